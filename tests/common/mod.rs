//! Fixture helpers shared by the integration tests.

#![allow(dead_code)]

use mkvdedup::container::writer::matroska_file;
use std::fs;
use std::path::{Path, PathBuf};

/// Deterministic pseudo-random bytes (xorshift), distinct per seed.
pub fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

pub fn frames(seed: u64, count: usize, len: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| noise(seed * 10_000 + i as u64, len)).collect()
}

/// A Matroska file with `clusters` clusters of `per_cluster` frames each.
pub fn media(seed: u64, clusters: usize, per_cluster: usize, frame_len: usize) -> Vec<u8> {
    let clusters: Vec<Vec<Vec<u8>>> = (0..clusters)
        .map(|c| frames(seed * 100 + c as u64, per_cluster, frame_len))
        .collect();
    matroska_file("fixture", &clusters)
}

pub fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Position of the first frame payload byte of a file built by
/// `matroska_file`.
pub fn first_payload_offset(file: &[u8], first_frame: &[u8]) -> usize {
    file.windows(first_frame.len().min(64))
        .position(|w| w == &first_frame[..first_frame.len().min(64)])
        .unwrap()
}
