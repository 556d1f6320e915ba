//! End-to-end behaviour of the public entry point on model files that never
//! reach the runtime.

use std::io::Write;
use std::path::{Path, PathBuf};

use pocket_core::{
    respond, sanitize, select_profile, ErrorKind, GenerationProfile, GenerationRequest, Pipeline,
    PipelineConfig,
};

fn write_model(dir: &Path, name: &str, header: &[u8], len: usize) -> PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(header).unwrap();
    f.write_all(&vec![0x5au8; len.saturating_sub(header.len())]).unwrap();
    path
}

#[test]
fn unopenable_paths_report_not_found() {
    let dir = tempfile::tempdir().unwrap();
    for path in [dir.path().join("nope.gguf"), dir.path().join("a/b/c.gguf")] {
        assert_eq!(respond(&path, "hello"), ErrorKind::NotFound.user_message());
    }
}

#[test]
fn small_files_report_corruption_regardless_of_content() {
    let dir = tempfile::tempdir().unwrap();
    for (i, (header, len)) in [
        (&b"GGUF"[..], 4usize),
        (&b"GGUF"[..], 999_999),
        (&b"junk"[..], 10),
        (&b""[..], 0),
    ]
    .into_iter()
    .enumerate()
    {
        let path = write_model(dir.path(), &format!("m{i}.gguf"), header, len);
        assert_eq!(respond(&path, "hello"), ErrorKind::TooSmall.user_message());
    }
}

#[test]
fn large_files_without_magic_report_invalid_format() {
    let dir = tempfile::tempdir().unwrap();
    let headers = [&b"GGML"[..], &b"gguf"[..], &b"\0\0\0\0"[..], &b"PK\x03\x04"[..]];
    for (i, header) in headers.into_iter().enumerate() {
        let path = write_model(dir.path(), &format!("m{i}.gguf"), header, 1_000_000);
        assert_eq!(respond(&path, "hello"), ErrorKind::InvalidFormat.user_message());
    }
}

#[test]
fn raised_size_floor_from_config_applies() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(dir.path(), "m.gguf", b"GGUF", 1_500_000);
    let pipeline = Pipeline::new(PipelineConfig {
        min_model_bytes: 2_000_000,
        ..Default::default()
    })
    .unwrap();
    let err = pipeline
        .generate(&GenerationRequest::new(&path, "hello"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooSmall);
}

#[test]
fn profiles_are_fixed_per_family() {
    let compact = GenerationProfile {
        context_size: 256,
        batch_size: 32,
        temperature: 0.1,
        top_k: 3,
        top_p: 0.2,
        max_tokens: 30,
    };
    let general = GenerationProfile {
        context_size: 256,
        batch_size: 32,
        temperature: 0.7,
        top_k: 40,
        top_p: 0.9,
        max_tokens: 50,
    };
    assert_eq!(select_profile(Path::new("models/phi-3-mini.gguf")), compact);
    assert_eq!(select_profile(Path::new("models/TinyLlama-1.1B.gguf")), compact);
    assert_eq!(select_profile(Path::new("models/qwen2-0.5b.gguf")), general);
}

#[test]
fn sanitizer_scenarios() {
    assert_eq!(sanitize("a"), ErrorKind::LowQualityResponse.user_message());
    assert_eq!(sanitize("This is a test of the app"), "This is a test of the app.");
    let once = sanitize("<|assistant|>  The answer   is forty two  <|end|>");
    assert_eq!(once, "The answer is forty two.");
    assert_eq!(sanitize(&once), once);
}
