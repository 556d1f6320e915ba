//! `pocket inspect`: validate a model file and print what would run.

use std::path::Path;

use anyhow::Result;
use pocket_core::{inspect_artifact, GenerateError, PipelineConfig};

pub fn execute(model: &Path, config: &PipelineConfig) -> Result<()> {
    let info = match inspect_artifact(model, config) {
        Ok(info) => info,
        Err(e) => {
            if let Some(gen) = e.downcast_ref::<GenerateError>() {
                println!("{}", gen.user_message());
            }
            return Err(e);
        }
    };

    println!("Pocket - Model Info");
    println!("===================");
    println!();
    println!("File:           {}", model.display());
    if !info.name.is_empty() {
        println!("Name:           {}", info.name);
    }
    println!(
        "Architecture:   {}",
        if info.architecture.is_empty() {
            "unknown"
        } else {
            &info.architecture
        }
    );
    println!("Context length: {}", info.context_length);
    println!("Tensors:        {}", info.tensor_count);
    println!("File size:      {}", format_bytes(info.file_size));
    println!();
    println!("Family:         {}", info.family);
    let p = &info.profile;
    println!(
        "Profile:        ctx={} batch={} temp={} top_k={} top_p={} max_tokens={}",
        p.context_size, p.batch_size, p.temperature, p.top_k, p.top_p, p.max_tokens
    );

    Ok(())
}

/// Format bytes for human display.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GiB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MiB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.0} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
