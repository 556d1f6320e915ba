//! Model artifact gate: existence, size floor and GGUF magic.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::GenerateError;

/// First four bytes of every GGUF file.
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Check that `path` looks like a usable GGUF model.
///
/// The file is opened, measured and its header read; nothing else is
/// consumed. The runtime reopens the file when it loads weights.
pub fn validate_artifact(path: &Path, min_size: u64) -> Result<(), GenerateError> {
    let mut file = File::open(path).map_err(|source| GenerateError::NotFound {
        path: path.to_path_buf(),
        source,
    })?;

    let size = file
        .metadata()
        .map_err(|source| GenerateError::NotFound {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if size < min_size {
        tracing::warn!(path = %path.display(), size, min_size, "model file below size floor");
        return Err(GenerateError::TooSmall {
            size,
            minimum: min_size,
        });
    }

    let mut header = [0u8; 4];
    if let Err(e) = file.read_exact(&mut header) {
        tracing::warn!(path = %path.display(), error = %e, "cannot read model header");
        return Err(GenerateError::InvalidFormat { header: Vec::new() });
    }
    if header != GGUF_MAGIC {
        return Err(GenerateError::InvalidFormat {
            header: header.to_vec(),
        });
    }

    tracing::debug!(path = %path.display(), size, "model artifact accepted");
    Ok(())
}
