//! Per-request transaction ID computation, re-implementing the service's
//! client-side signing algorithm from its HTML and JavaScript assets.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use super::cubic::{float_to_hex, interpolate, js_round, odd_coefficient, rotation_matrix, Cubic};
use super::parser;
use crate::constants::SIGNING_KEYWORD;
use crate::error::{Error, Result};

/// Epoch offset used by the service: 2023-05-01 00:00:00 UTC, in millis.
const EPOCH_OFFSET_MS: i64 = 1_682_924_400_000;
const TOTAL_ANIMATION_TIME: f64 = 4096.0;
const PROTOCOL_BYTE: u8 = 0x03;

/// Signing material derived from one fetch of the home page and on-demand
/// script. Immutable once built; the manager swaps whole instances.
pub struct ClientTransaction {
    key_bytes: Vec<u8>,
    animation_key: String,
    row_index: usize,
    key_byte_indices: Vec<usize>,
}

impl ClientTransaction {
    pub fn new(home_html: &str, ondemand_js: &str) -> Result<Self> {
        let (row_index, key_byte_indices) = parser::key_indices(ondemand_js)
            .ok_or_else(|| Error::Signing("no key byte indices in on-demand script".into()))?;

        let key = parser::verification_key(home_html)
            .ok_or_else(|| Error::Signing("twitter-site-verification meta tag not found".into()))?;
        let key_bytes = BASE64
            .decode(&key)
            .map_err(|e| Error::Signing(format!("decode verification key: {e}")))?;

        let mut ct = Self {
            key_bytes,
            animation_key: String::new(),
            row_index,
            key_byte_indices,
        };
        ct.animation_key = ct.build_animation_key(home_html)?;
        Ok(ct)
    }

    pub fn animation_key(&self) -> &str {
        &self.animation_key
    }

    fn frame_rows(&self, home_html: &str) -> Option<Vec<Vec<i64>>> {
        if self.key_bytes.len() < 6 {
            return None;
        }
        let frames = parser::svg_frames(home_html);
        let frame_index = (self.key_bytes[5] % 4) as usize;
        frames.into_iter().nth(frame_index)?
    }

    /// Maps a byte in [0, 255] onto [min, max]; `rounding` selects floor
    /// (rotations) over round-to-2-decimals (curve parameters).
    fn solve(value: f64, min: f64, max: f64, rounding: bool) -> f64 {
        let result = value * (max - min) / 255.0 + min;
        if rounding {
            result.floor()
        } else {
            (result * 100.0).round() / 100.0
        }
    }

    fn animate(&self, frame: &[i64], target_time: f64) -> Result<String> {
        if frame.len() < 11 {
            return Err(Error::Signing(format!(
                "animation frame has {} values, need at least 11",
                frame.len()
            )));
        }

        let from_color = [frame[0] as f64, frame[1] as f64, frame[2] as f64, 1.0];
        let to_color = [frame[3] as f64, frame[4] as f64, frame[5] as f64, 1.0];
        let from_rotation = [0.0];
        let to_rotation = [Self::solve(frame[6] as f64, 60.0, 360.0, true)];

        let curves: Vec<f64> = frame[7..]
            .iter()
            .enumerate()
            .map(|(i, &v)| Self::solve(v as f64, odd_coefficient(i), 1.0, false))
            .collect();

        let factor = Cubic::new(curves).value(target_time);

        let color: Vec<f64> = interpolate(&from_color, &to_color, factor)
            .into_iter()
            .map(|c| c.clamp(0.0, 255.0))
            .collect();
        let rotation = interpolate(&from_rotation, &to_rotation, factor);
        let matrix = rotation_matrix(rotation[0]);

        let mut parts: Vec<String> = Vec::with_capacity(9);
        for c in &color[..3] {
            parts.push(format!("{:x}", c.round() as i64));
        }
        for value in matrix {
            let rounded = ((value * 100.0).round() / 100.0).abs();
            let hex = float_to_hex(rounded);
            if hex.starts_with('.') {
                parts.push(format!("0{}", hex.to_lowercase()));
            } else if hex.is_empty() {
                parts.push("0".to_string());
            } else {
                parts.push(hex);
            }
        }
        parts.push("0".to_string());
        parts.push("0".to_string());

        Ok(parts.concat().replace(['.', '-'], ""))
    }

    fn build_animation_key(&self, home_html: &str) -> Result<String> {
        if self.key_byte_indices.is_empty() {
            return Err(Error::Signing("no key byte indices".into()));
        }

        let row_index = match self.key_bytes.get(self.row_index) {
            Some(&b) => (b % 16) as usize,
            None => 0,
        };

        let mut frame_time = 1.0;
        for &idx in &self.key_byte_indices {
            if let Some(&b) = self.key_bytes.get(idx) {
                frame_time *= (b % 16) as f64;
            }
        }
        let frame_time = js_round(frame_time / 10.0) * 10.0;

        let rows = self
            .frame_rows(home_html)
            .ok_or_else(|| Error::Signing("no animation frames in home HTML".into()))?;
        let frame = rows
            .get(row_index)
            .ok_or_else(|| Error::Signing("animation row index out of bounds".into()))?;

        self.animate(frame, frame_time / TOTAL_ANIMATION_TIME)
    }

    /// Seconds since the service epoch for the current wall clock.
    fn current_time() -> u32 {
        ((chrono::Utc::now().timestamp_millis() - EPOCH_OFFSET_MS) / 1000).max(0) as u32
    }

    /// Computes the transaction ID for an HTTP method and URL path. The
    /// query string never participates in signing.
    pub fn generate_id(&self, method: &str, path: &str) -> String {
        self.generate_id_at(method, path, Self::current_time())
    }

    pub(crate) fn generate_id_at(&self, method: &str, path: &str, time: u32) -> String {
        let path = path.split('?').next().unwrap_or(path);

        let hash_input = format!(
            "{method}!{path}!{time}{SIGNING_KEYWORD}{}",
            self.animation_key
        );
        let hash = Sha256::digest(hash_input.as_bytes());

        let mut bytes = Vec::with_capacity(self.key_bytes.len() + 4 + 16 + 1);
        bytes.extend_from_slice(&self.key_bytes);
        bytes.extend_from_slice(&time.to_le_bytes());
        bytes.extend_from_slice(&hash[..16]);
        bytes.push(PROTOCOL_BYTE);

        let mask: u8 = rand::thread_rng().gen();
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.push(mask);
        out.extend(bytes.iter().map(|b| b ^ mask));

        let encoded = BASE64.encode(&out);
        encoded.trim_end_matches('=').to_string()
    }
}
