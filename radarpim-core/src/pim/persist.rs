//! Save and restore a PIM
//!
//! ```text
//! +0    "PIM1"
//! +4    version            u16
//! +6    reserved           u16
//! +8    range dim          u32
//! +12   azimuth dim        u32
//! +16   max azimuth dim    u32
//! +20   max bytes/sample   u32
//! +24   last bucket        u32   (0xFFFFFFFF = none)
//! +28   settings length    u32
//! +32   reserved to 64
//! +64   settings           bincode PimSettings
//!       per cell:  state u8, header [48], payload [radar_video_size]
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use super::{CellState, Pim, PimConfig, PimSettings};
use crate::error::PimError;
use crate::header::{ReturnHeader, HEADER_SIZE};
use crate::runtime::Runtime;

pub const PIM_FILE_MAGIC: [u8; 4] = *b"PIM1";
pub const PIM_FILE_VERSION: u16 = 1;
pub const PIM_FILE_HEADER_SIZE: usize = 64;

const NO_BUCKET: u32 = u32::MAX;

/// Largest settings block a file may declare
pub const MAX_SETTINGS_LEN: u32 = 64 * 1024;

/// Fixed part of a saved PIM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PimFileHeader {
    pub version: u16,
    pub range_dim: u32,
    pub azimuth_dim: u32,
    pub max_azimuth_dim: u32,
    pub max_bytes_per_sample: u32,
    pub last_bucket: Option<u32>,
    pub settings_len: u32,
}

impl PimFileHeader {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; PIM_FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&PIM_FILE_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.range_dim.to_le_bytes());
        buf[12..16].copy_from_slice(&self.azimuth_dim.to_le_bytes());
        buf[16..20].copy_from_slice(&self.max_azimuth_dim.to_le_bytes());
        buf[20..24].copy_from_slice(&self.max_bytes_per_sample.to_le_bytes());
        buf[24..28].copy_from_slice(&self.last_bucket.unwrap_or(NO_BUCKET).to_le_bytes());
        buf[28..32].copy_from_slice(&self.settings_len.to_le_bytes());
        writer.write_all(&buf)
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, PimError> {
        let mut buf = [0u8; PIM_FILE_HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        if buf[0..4] != PIM_FILE_MAGIC {
            return Err(PimError::File("bad magic bytes".to_string()));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > PIM_FILE_VERSION {
            return Err(PimError::File(format!("unsupported version {}", version)));
        }
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let last_bucket = u32_at(24);
        Ok(Self {
            version,
            range_dim: u32_at(8),
            azimuth_dim: u32_at(12),
            max_azimuth_dim: u32_at(16),
            max_bytes_per_sample: u32_at(20),
            last_bucket: (last_bucket != NO_BUCKET).then_some(last_bucket),
            settings_len: u32_at(28),
        })
    }
}

impl Pim {
    pub fn save_to_file(&self, path: &Path) -> Result<(), PimError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save_to(&mut writer)?;
        writer.flush()?;
        info!("{}: saved to {}", self.name, path.display());
        Ok(())
    }

    /// Write settings and every cell. The data lock is held for the whole
    /// write so the image is consistent.
    pub fn save_to<W: Write>(&self, writer: &mut W) -> Result<(), PimError> {
        let settings = bincode::serialize(&self.settings())?;
        let state = self.lock_state();
        let header = PimFileHeader {
            version: PIM_FILE_VERSION,
            range_dim: self.range_dim as u32,
            azimuth_dim: state.store.azimuth_dim() as u32,
            max_azimuth_dim: self.max_azimuth_dim as u32,
            max_bytes_per_sample: self.max_bytes_per_sample as u32,
            last_bucket: state.last_bucket,
            settings_len: settings.len() as u32,
        };
        header.write(writer)?;
        writer.write_all(&settings)?;
        for cell in state.store.cells() {
            writer.write_all(&[cell.state() as u8])?;
            writer.write_all(&cell.header.to_bytes())?;
            writer.write_all(cell.payload())?;
        }
        Ok(())
    }

    pub fn load_from_file(&self, path: &Path) -> Result<(), PimError> {
        let mut reader = BufReader::new(File::open(path)?);
        self.load_from(&mut reader)?;
        info!("{}: loaded from {}", self.name, path.display());
        Ok(())
    }

    /// Create a PIM shaped like the one saved in `path` and load it
    pub fn open(runtime: Arc<Runtime>, path: &Path) -> Result<Pim, PimError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = PimFileHeader::read(&mut reader)?;
        let name = path
            .file_stem()
            .map_or_else(|| "pim".to_string(), |s| s.to_string_lossy().into_owned());
        let config = PimConfig {
            name,
            range_dim: header.range_dim,
            max_azimuth_dim: header.max_azimuth_dim,
            max_bytes_per_sample: header.max_bytes_per_sample,
            settings: PimSettings {
                azimuth_dim: header.azimuth_dim,
                ..Default::default()
            },
        };
        let pim = Pim::new(runtime, config)?;
        pim.load_body(&header, &mut reader)?;
        Ok(pim)
    }

    /// Replace settings and cells with a saved image. The image must have
    /// the same range dimension and sample size, and an azimuth dimension
    /// this PIM can hold.
    pub fn load_from<R: Read>(&self, reader: &mut R) -> Result<(), PimError> {
        let header = PimFileHeader::read(reader)?;
        self.load_body(&header, reader)
    }

    fn load_body<R: Read>(&self, header: &PimFileHeader, reader: &mut R) -> Result<(), PimError> {
        if header.range_dim as usize != self.range_dim {
            return Err(PimError::Incompatible(format!(
                "range dimension {} in file, {} in store",
                header.range_dim, self.range_dim
            )));
        }
        if header.max_bytes_per_sample as usize != self.max_bytes_per_sample {
            return Err(PimError::Incompatible(format!(
                "{} bytes per sample in file, {} in store",
                header.max_bytes_per_sample, self.max_bytes_per_sample
            )));
        }
        if header.azimuth_dim as usize > self.max_azimuth_dim {
            return Err(PimError::Incompatible(format!(
                "azimuth dimension {} in file exceeds maximum {}",
                header.azimuth_dim, self.max_azimuth_dim
            )));
        }

        if header.settings_len > MAX_SETTINGS_LEN {
            return Err(PimError::File(format!(
                "settings block of {} bytes exceeds {}",
                header.settings_len, MAX_SETTINGS_LEN
            )));
        }
        let mut settings = vec![0u8; header.settings_len as usize];
        reader.read_exact(&mut settings)?;
        let mut settings: PimSettings = bincode::deserialize(&settings)?;
        settings.azimuth_dim = header.azimuth_dim;

        // Read every cell before touching the store so a truncated file
        // leaves the PIM as it was
        let capacity = self.range_dim * self.max_bytes_per_sample;
        let mut cells = Vec::with_capacity(header.azimuth_dim as usize);
        let mut raw = [0u8; HEADER_SIZE];
        for azimuth in 0..header.azimuth_dim {
            let mut state = [0u8; 1];
            reader.read_exact(&mut state)?;
            let state = CellState::from_u8(state[0])
                .ok_or_else(|| PimError::File(format!("bad cell state {} at azimuth {}", state[0], azimuth)))?;
            reader.read_exact(&mut raw)?;
            let cell_header = ReturnHeader::from_bytes(&raw)?;
            let len = cell_header.radar_video_size as usize;
            if len > capacity {
                return Err(PimError::File(format!(
                    "cell payload of {} bytes at azimuth {} exceeds {}",
                    len, azimuth, capacity
                )));
            }
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            cells.push((state, cell_header, payload));
        }

        self.apply_settings(settings)?;
        let mut state = self.lock_state();
        state.store.set_azimuth_dim(header.azimuth_dim as usize);
        for (azimuth, (cell_state, cell_header, payload)) in cells.iter().enumerate() {
            state.store.write(azimuth, *cell_state, cell_header, payload);
        }
        state.reset_tracking();
        state.last_bucket = header.last_bucket.filter(|&b| b < header.azimuth_dim);
        debug!(
            "{}: loaded {} cells, {} populated",
            self.name,
            cells.len(),
            state.store.num_populated()
        );
        Ok(())
    }
}
