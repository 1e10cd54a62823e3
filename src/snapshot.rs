//! Saving experiment state without dragging instruments along.
//!
//! Experiment structs mix plain data (wavelengths, labels, sweep
//! results) with live instrument connections. The data should persist;
//! the connections cannot. Wrapping each instrument in a
//! [`HardwareHandle`] makes any containing struct serializable: the
//! handle saves as a small placeholder and always restores
//! disconnected.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HardwareUnavailable;
use crate::paths;
use crate::persist::with_extension_suffix;

/// Last segment of a type path, so `station::Keithley2400` and a later
/// `drivers::keithley::Keithley2400` count as the same thing.
fn short_type_name(full: &str) -> &str {
    full.rsplit("::").next().unwrap_or(full)
}

/// What a [`HardwareHandle`] looks like on disk: a note of what used to
/// be connected there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareReference {
    pub type_name: String,
}

impl HardwareReference {
    /// The error callers get when they poke this instead of a live
    /// instrument.
    pub fn unavailable(&self) -> HardwareUnavailable {
        HardwareUnavailable {
            type_name: self.type_name.clone(),
        }
    }
}

/// Holds a live instrument connection, or nothing.
///
/// Serializing a handle never saves the instrument itself, only a
/// [`HardwareReference`] placeholder; deserializing always yields a
/// disconnected handle. Code that needs the instrument calls [`get`]
/// and deals with [`HardwareUnavailable`] after a reload.
///
/// [`get`]: HardwareHandle::get
pub struct HardwareHandle<T> {
    inner: Option<T>,
}

impl<T> HardwareHandle<T> {
    /// Wraps a live connection.
    pub fn connected(instrument: T) -> Self {
        HardwareHandle {
            inner: Some(instrument),
        }
    }

    /// A handle with nothing behind it, as after a reload.
    pub fn disconnected() -> Self {
        HardwareHandle { inner: None }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_some()
    }

    /// Attaches a live connection, replacing any previous one.
    pub fn connect(&mut self, instrument: T) {
        self.inner = Some(instrument);
    }

    /// Takes the connection out of the handle, if there is one.
    pub fn disconnect(&mut self) -> Option<T> {
        self.inner.take()
    }

    pub fn get(&self) -> Result<&T, HardwareUnavailable> {
        match &self.inner {
            Some(instrument) => Ok(instrument),
            None => Err(self.placeholder_error()),
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut T, HardwareUnavailable> {
        let placeholder = self.placeholder_error();
        match &mut self.inner {
            Some(instrument) => Ok(instrument),
            None => Err(placeholder),
        }
    }

    fn type_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<T>())
    }

    fn placeholder_error(&self) -> HardwareUnavailable {
        HardwareUnavailable {
            type_name: self.type_name().to_string(),
        }
    }
}

impl<T> Default for HardwareHandle<T> {
    fn default() -> Self {
        HardwareHandle::disconnected()
    }
}

impl<T> fmt::Debug for HardwareHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HardwareHandle<{}>({})",
            self.type_name(),
            if self.is_connected() {
                "connected"
            } else {
                "disconnected"
            }
        )
    }
}

impl<T> Serialize for HardwareHandle<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.is_connected() {
            warn!(
                "Not persisting live {} connection; saving a placeholder instead",
                self.type_name()
            );
        }
        HardwareReference {
            type_name: self.type_name().to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for HardwareHandle<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Whatever was written, the live connection is gone.
        HardwareReference::deserialize(deserializer)?;
        Ok(HardwareHandle::disconnected())
    }
}

/// On-disk wrapper recording what type a snapshot came from and when.
#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    #[serde(rename = "type")]
    type_path: String,
    #[serde(default)]
    saved: Option<DateTime<Utc>>,
    state: serde_json::Value,
}

/// Snapshot an experiment struct to JSON and get it back later.
///
/// The saved file wraps the state in an envelope naming the source
/// type. Loading checks that name, but only its last path segment, so
/// state survives the type moving between modules. Opt a type in with
/// an empty impl:
///
/// ```ignore
/// impl JsonSnapshot for LaserStation {}
/// ```
pub trait JsonSnapshot: Serialize + DeserializeOwned {
    /// Type path recorded in saved files.
    fn type_path() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Renders the snapshot envelope as pretty JSON.
    fn to_json_string(&self) -> Result<String> {
        let envelope = SnapshotEnvelope {
            type_path: Self::type_path().to_string(),
            saved: Some(Utc::now()),
            state: serde_json::to_value(self).context("Failed to serialize snapshot state")?,
        };
        serde_json::to_string_pretty(&envelope).context("Failed to serialize snapshot envelope")
    }

    /// Parses a snapshot envelope, refusing state saved by a different
    /// type.
    fn from_json_checked(json: &str) -> Result<Self> {
        let envelope: SnapshotEnvelope =
            serde_json::from_str(json).context("Failed to decode snapshot envelope")?;
        let expected = Self::type_path();
        if short_type_name(&envelope.type_path) != short_type_name(expected) {
            bail!(
                "Loaded type is different than intended: got {}, needed {}",
                envelope.type_path,
                expected
            );
        }
        serde_json::from_value(envelope.state).context("Failed to restore snapshot state")
    }

    /// Saves the snapshot to a data file. The `.json` suffix is added
    /// to the filename if not already present.
    fn save<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let json_name = with_extension_suffix(filename.as_ref(), "json");
        let path = paths::resolve_data_file(&json_name)?;
        fs::write(&path, self.to_json_string()?)
            .with_context(|| format!("Failed to write snapshot to {}", path.display()))
    }

    /// Loads a snapshot saved with [`save`]. The `.json` suffix is
    /// added to the filename if not already present.
    ///
    /// [`save`]: JsonSnapshot::save
    fn load<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let json_name = with_extension_suffix(filename.as_ref(), "json");
        let path = paths::resolve_existing_file(&json_name)?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read snapshot from {}", path.display()))?;
        Self::from_json_checked(&text)
            .with_context(|| format!("while loading snapshot {}", path.display()))
    }

    /// Serialize-then-restore in one step. Handy for checking exactly
    /// what a save would preserve; hardware handles come back
    /// disconnected.
    fn clone_via_json(&self) -> Result<Self> {
        Self::from_json_checked(&self.to_json_string()?)
    }
}
