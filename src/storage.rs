//! Scratch-space storage collaborator
//!
//! Platforms carry a small tag-addressed scratch area (battery-backed
//! registers or an EEPROM window) shared between power components. The
//! arbiter stores nothing critical there; it persists a session counter
//! best-effort and keeps working when no store is fitted.

use crate::error::{HeliosError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Four-character tag addressing one scratch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

/// Direct-charge session counter, little-endian u64.
pub const TAG_SESSION_COUNT: Tag = Tag(*b"DCCN");

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Get/set-by-tag byte-blob storage.
///
/// Slot sizes are fixed by the backing hardware; a read or write whose
/// buffer does not match the slot size fails with `OutOfRange`, an
/// unknown tag with `NotFound`.
#[async_trait::async_trait]
pub trait TagStore: Send + Sync {
    /// Read the blob stored under `tag` into `buf`
    async fn read_tag(&self, tag: Tag, buf: &mut [u8]) -> Result<()>;

    /// Write `data` to the slot addressed by `tag`
    async fn write_tag(&self, tag: Tag, data: &[u8]) -> Result<()>;
}

/// In-memory store for tests and hardware-less bring-up.
///
/// The first write to a tag fixes that slot's size, mimicking the fixed
/// layout of the hardware scratch space.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<Tag, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TagStore for MemoryStore {
    async fn read_tag(&self, tag: Tag, buf: &mut [u8]) -> Result<()> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| HeliosError::io("storage lock poisoned"))?;
        let blob = slots
            .get(&tag)
            .ok_or_else(|| HeliosError::not_found(format!("tag {}", tag)))?;
        if blob.len() != buf.len() {
            return Err(HeliosError::out_of_range(format!(
                "tag {} holds {} bytes, caller asked for {}",
                tag,
                blob.len(),
                buf.len()
            )));
        }
        buf.copy_from_slice(blob);
        Ok(())
    }

    async fn write_tag(&self, tag: Tag, data: &[u8]) -> Result<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| HeliosError::io("storage lock poisoned"))?;
        if let Some(blob) = slots.get(&tag)
            && blob.len() != data.len()
        {
            return Err(HeliosError::out_of_range(format!(
                "tag {} holds {} bytes, caller wrote {}",
                tag,
                blob.len(),
                data.len()
            )));
        }
        slots.insert(tag, data.to_vec());
        Ok(())
    }
}
