//! Legacy sideband files.
//!
//! Policy processes that predate the decision channel poll a directory for
//! newline-terminated decimal strings. Every write lands in a temporary
//! file that is renamed into place, so a reader sees either the previous
//! content or the complete new one. Reading them back is the policy
//! side's job.

use std::fs;
use std::path::{Path, PathBuf};

use sidelink_core::encoding::EncodedObservations;
use tracing::trace;

use crate::errors::HandoffError;

pub const SRC_ID_FILE: &str = "encodedSrcId.txt";
pub const RETX_COUNTER_FILE: &str = "encodedRetransCounter.txt";
pub const SLOT_FILE: &str = "encodedSlot.txt";
pub const SUB_BAND_FILE: &str = "encodedSubBand.txt";
pub const INSTRUCTIONS_FILE: &str = "encodedSelectionInstructions.txt";

/// Directory holding the sideband files.
#[derive(Debug, Clone)]
pub struct SidebandDir {
    dir: PathBuf,
}

impl SidebandDir {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, HandoffError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn write_observations(&self, encoded: &EncodedObservations) -> Result<(), HandoffError> {
        self.write_atomic(SRC_ID_FILE, &encoded.src_ids)?;
        self.write_atomic(RETX_COUNTER_FILE, &encoded.retx_counters)?;
        self.write_atomic(SLOT_FILE, &encoded.slots)?;
        self.write_atomic(SUB_BAND_FILE, &encoded.sub_bands)?;
        Ok(())
    }

    pub fn write_instructions(&self, instructions: &str) -> Result<(), HandoffError> {
        self.write_atomic(INSTRUCTIONS_FILE, instructions)
    }

    fn write_atomic(&self, name: &str, content: &str) -> Result<(), HandoffError> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        fs::write(&tmp, format!("{content}\n"))?;
        fs::rename(&tmp, &target)?;
        trace!(file = %target.display(), "sideband file written");
        Ok(())
    }
}
