//! Command-Line Playback Device
//!
//! Plays each track by running an external player (for example `ffplay
//! -nodisp -autoexit` or `mpv --no-video`) with the track path as its last
//! argument. The track counts as playing for as long as the child process is
//! alive. In-memory tracks are written to a temporary file first.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use stagehand_runtime::playlist::{DeviceError, DeviceResult, PlaybackDevice};
use stagehand_types::Track;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

struct Loaded {
    path: PathBuf,
    /// Spilled buffer; removed from disk when dropped
    _spill: Option<NamedTempFile>,
}

/// Device that shells out to a player program
pub struct CommandPlayer {
    name: String,
    program: String,
    args: Vec<String>,
    loaded: Mutex<Option<Loaded>>,
    child: Mutex<Option<Child>>,
}

impl CommandPlayer {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        Self {
            name: format!("command:{}", program),
            program,
            args: args.into_iter().map(Into::into).collect(),
            loaded: Mutex::new(None),
            child: Mutex::new(None),
        }
    }

    /// Build from a `[program, args...]` list
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    async fn spill(label: &str, format: &str, bytes: Bytes) -> DeviceResult<NamedTempFile> {
        let suffix = format!(".{}", format);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut file = tempfile::Builder::new().prefix("stagehand-").suffix(&suffix).tempfile()?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| DeviceError::Failed(format!("spill task failed: {}", e)))??;
        debug!("Spilled buffer '{}' to {}", label, file.path().display());
        Ok(file)
    }

    async fn kill_child(child: &mut Option<Child>) -> DeviceResult<()> {
        if let Some(mut running) = child.take() {
            // An already exited child is fine
            if running.try_wait()?.is_none() {
                running.kill().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlaybackDevice for CommandPlayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, track: &Track) -> DeviceResult<()> {
        let loaded = match track {
            Track::File(path) => {
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(DeviceError::Io(format!("{} does not exist", path.display())));
                }
                Loaded {
                    path: path.clone(),
                    _spill: None,
                }
            }
            Track::Buffer { label, format, bytes } => {
                let file = Self::spill(label, format, bytes.clone()).await?;
                Loaded {
                    path: file.path().to_path_buf(),
                    _spill: Some(file),
                }
            }
        };
        *self.loaded.lock().await = Some(loaded);
        Ok(())
    }

    async fn play(&self) -> DeviceResult<()> {
        let path = self
            .loaded
            .lock()
            .await
            .as_ref()
            .map(|l| l.path.clone())
            .ok_or(DeviceError::NothingLoaded)?;

        let mut child = self.child.lock().await;
        Self::kill_child(&mut child).await?;

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeviceError::Failed(format!("Cannot start '{}': {}", self.program, e)))?;
        debug!(pid = spawned.id(), "Player started for {}", path.display());
        *child = Some(spawned);
        Ok(())
    }

    async fn stop(&self) -> DeviceResult<()> {
        let mut child = self.child.lock().await;
        Self::kill_child(&mut child).await
    }

    async fn is_playing(&self) -> DeviceResult<bool> {
        let mut child = self.child.lock().await;
        let Some(running) = child.as_mut() else {
            return Ok(false);
        };
        match running.try_wait()? {
            None => Ok(true),
            Some(status) => {
                debug!("Player exited: {}", status);
                *child = None;
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for CommandPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPlayer")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish()
    }
}
