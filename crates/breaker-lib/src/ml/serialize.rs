//! Versioned byte codec for the ensemble
//!
//! Explicit little-endian layout instead of opaque object serialization:
//!
//! ```text
//! magic "ENSB" | version u16 | input u16 | net count u8 | base lr f64
//! per net: hidden u16 | momentum f64 | l2 f64 | bias2 f64
//!          | weights1 (input * hidden f64) | biases1 (hidden f64)
//!          | weights2 (hidden f64)
//! ensemble weights (net count f64) | sha-256 of everything above
//! ```
//!
//! Unknown versions and checksum mismatches fail closed: the caller treats
//! the blob as "no loaded model". Momentum velocities are transient and are
//! not persisted.

use super::ensemble::EnsemblePredictor;
use super::network::NeuralNet;
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"ENSB";
const VERSION: u16 = 1;
const CHECKSUM_LEN: usize = 32;

/// Serialize an ensemble into a self-describing blob
pub fn encode_ensemble(model: &EnsemblePredictor) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4_096);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(model.input_size as u16).to_le_bytes());
    buf.push(model.nets.len() as u8);
    buf.extend_from_slice(&model.base_learning_rate.to_le_bytes());

    for net in &model.nets {
        buf.extend_from_slice(&(net.hidden_size as u16).to_le_bytes());
        buf.extend_from_slice(&net.momentum.to_le_bytes());
        buf.extend_from_slice(&net.l2_lambda.to_le_bytes());
        buf.extend_from_slice(&net.bias2.to_le_bytes());
        for row in &net.weights1 {
            for weight in row {
                buf.extend_from_slice(&weight.to_le_bytes());
            }
        }
        for bias in &net.biases1 {
            buf.extend_from_slice(&bias.to_le_bytes());
        }
        for weight in &net.weights2 {
            buf.extend_from_slice(&weight.to_le_bytes());
        }
    }

    for weight in &model.weights {
        buf.extend_from_slice(&weight.to_le_bytes());
    }

    let checksum = Sha256::digest(&buf);
    buf.extend_from_slice(&checksum);
    buf
}

/// Deserialize a blob produced by [`encode_ensemble`]
pub fn decode_ensemble(bytes: &[u8]) -> Result<EnsemblePredictor> {
    if bytes.len() < MAGIC.len() + CHECKSUM_LEN {
        bail!("model blob too short: {} bytes", bytes.len());
    }

    let (payload, stored_checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let computed = Sha256::digest(payload);
    if computed.as_slice() != stored_checksum {
        bail!("model blob checksum mismatch");
    }

    let mut reader = Reader::new(payload);
    let magic = reader.take(4)?;
    if magic != MAGIC {
        bail!("bad model magic {:02x?}", magic);
    }
    let version = reader.u16()?;
    if version != VERSION {
        bail!("unsupported model version {version}");
    }

    let input_size = reader.u16()? as usize;
    let net_count = reader.u8()? as usize;
    let base_learning_rate = reader.f64()?;

    let mut nets = Vec::with_capacity(net_count);
    for _ in 0..net_count {
        let hidden_size = reader.u16()? as usize;
        let momentum = reader.f64()?;
        let l2_lambda = reader.f64()?;
        let bias2 = reader.f64()?;

        let mut weights1 = Vec::with_capacity(input_size);
        for _ in 0..input_size {
            let mut row = Vec::with_capacity(hidden_size);
            for _ in 0..hidden_size {
                row.push(reader.f64()?);
            }
            weights1.push(row);
        }
        let mut biases1 = Vec::with_capacity(hidden_size);
        for _ in 0..hidden_size {
            biases1.push(reader.f64()?);
        }
        let mut weights2 = Vec::with_capacity(hidden_size);
        for _ in 0..hidden_size {
            weights2.push(reader.f64()?);
        }

        nets.push(NeuralNet::from_parts(
            momentum, l2_lambda, weights1, biases1, weights2, bias2,
        ));
    }

    let mut weights = Vec::with_capacity(net_count);
    for _ in 0..net_count {
        weights.push(reader.f64()?);
    }

    Ok(EnsemblePredictor::from_parts(
        nets,
        weights,
        input_size,
        base_learning_rate,
    ))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .context("model blob truncated")?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let slice = self.take(2)?;
        Ok(u16::from_le_bytes([slice[0], slice[1]]))
    }

    fn f64(&mut self) -> Result<f64> {
        let slice = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(slice);
        Ok(f64::from_le_bytes(buf))
    }
}
