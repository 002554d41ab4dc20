//! Binary delta engines.
//!
//! The pipeline treats the delta algorithm as an opaque step over
//! forward-only streams. [`BsdiffEngine`] produces and applies bsdiff 4
//! patches; it reads each input to the end once and writes its output
//! sequentially.

use std::io::{Read, Write};

use didiff_core::error::{PatchError, Result};
use qbsdiff::{Bsdiff, Bspatch};

/// Produce a patch from two streams, or rebuild a stream from a patch.
pub trait DeltaEngine: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Write a patch turning `old` into `new` to `patch`.
    fn diff(&self, old: &mut dyn Read, new: &mut dyn Read, patch: &mut dyn Write) -> Result<()>;

    /// Rebuild the target stream from `source` and `patch` into `output`.
    ///
    /// Returns the number of bytes written.
    fn patch(
        &self,
        source: &mut dyn Read,
        patch: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<u64>;
}

/// bsdiff 4 delta engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsdiffEngine;

impl DeltaEngine for BsdiffEngine {
    fn name(&self) -> &str {
        "bsdiff"
    }

    fn diff(&self, old: &mut dyn Read, new: &mut dyn Read, patch: &mut dyn Write) -> Result<()> {
        let old = read_all(old, "source")?;
        let new = read_all(new, "target")?;

        let written = Bsdiff::new(&old, &new)
            .compare(&mut *patch)
            .map_err(|e| PatchError::Delta(format!("Failed to compute patch: {e}")))?;
        patch
            .flush()
            .map_err(|e| PatchError::Delta(format!("Failed to write patch: {e}")))?;

        tracing::debug!(
            old_bytes = old.len(),
            new_bytes = new.len(),
            patch_bytes = written,
            "Computed delta"
        );
        Ok(())
    }

    fn patch(
        &self,
        source: &mut dyn Read,
        patch: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<u64> {
        let source = read_all(source, "source")?;
        let patch = read_all(patch, "patch")?;

        let patcher = Bspatch::new(&patch)
            .map_err(|e| PatchError::Delta(format!("Invalid patch: {e}")))?;
        let written = patcher
            .apply(&source, &mut *output)
            .map_err(|e| PatchError::Delta(format!("Failed to apply patch: {e}")))?;
        output
            .flush()
            .map_err(|e| PatchError::Delta(format!("Failed to write output: {e}")))?;

        tracing::debug!(
            source_bytes = source.len(),
            patch_bytes = patch.len(),
            output_bytes = written,
            "Applied delta"
        );
        Ok(written)
    }
}

fn read_all(reader: &mut dyn Read, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| PatchError::Delta(format!("Failed to read {what} stream: {e}")))?;
    Ok(buf)
}
