//! Polar cell array
//!
//! One cell per azimuth bucket, each holding a header copy and room for
//! `range_dim` samples of the widest supported sample size. Cells are
//! allocated once for the maximum azimuth dimension and recycled in place.

use crate::header::{PimFlags, ReturnHeader};

/// How a cell came to hold data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellState {
    Empty = 0,
    /// Written from a real return
    Data = 1,
    /// Synthesised to cover an azimuth gap
    Filled = 2,
}

impl CellState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CellState::Empty),
            1 => Some(CellState::Data),
            2 => Some(CellState::Filled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub(crate) state: CellState,
    pub(crate) header: ReturnHeader,
    pub(crate) data: Box<[u8]>,
}

impl Cell {
    fn new(capacity: usize) -> Self {
        Cell {
            state: CellState::Empty,
            header: ReturnHeader::default(),
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.state == CellState::Empty
    }

    pub fn header(&self) -> Option<&ReturnHeader> {
        (!self.is_empty()).then_some(&self.header)
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        let len = (self.header.radar_video_size as usize).min(self.data.len());
        &self.data[..len]
    }

    fn reset(&mut self, preserve: PimFlags) {
        self.state = CellState::Empty;
        self.header = ReturnHeader {
            pim_flags: self.header.pim_flags & preserve,
            ..ReturnHeader::default()
        };
        self.data.fill(0);
    }
}

#[derive(Debug, Clone)]
pub struct PolarStore {
    range_dim: usize,
    max_bytes_per_sample: usize,
    azimuth_dim: usize,
    cells: Vec<Cell>,
}

impl PolarStore {
    pub fn new(range_dim: usize, azimuth_dim: usize, max_azimuth_dim: usize, max_bytes_per_sample: usize) -> Self {
        let capacity = range_dim * max_bytes_per_sample;
        PolarStore {
            range_dim,
            max_bytes_per_sample,
            azimuth_dim,
            cells: (0..max_azimuth_dim).map(|_| Cell::new(capacity)).collect(),
        }
    }

    pub fn range_dim(&self) -> usize {
        self.range_dim
    }

    pub fn azimuth_dim(&self) -> usize {
        self.azimuth_dim
    }

    pub fn max_azimuth_dim(&self) -> usize {
        self.cells.len()
    }

    pub fn max_bytes_per_sample(&self) -> usize {
        self.max_bytes_per_sample
    }

    pub(crate) fn set_azimuth_dim(&mut self, azimuth_dim: usize) {
        self.azimuth_dim = azimuth_dim;
        self.clear(PimFlags::empty());
    }

    pub fn cell(&self, azimuth: usize) -> Option<&Cell> {
        self.cells[..self.azimuth_dim].get(azimuth)
    }

    pub(crate) fn cell_mut(&mut self, azimuth: usize) -> &mut Cell {
        &mut self.cells[azimuth]
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells[..self.azimuth_dim].iter()
    }

    pub fn num_populated(&self) -> usize {
        self.cells().filter(|c| !c.is_empty()).count()
    }

    /// Empty every cell, keeping only the `preserve` PIM flags of each
    pub fn clear(&mut self, preserve: PimFlags) {
        for cell in &mut self.cells {
            cell.reset(preserve);
        }
    }

    /// Replace the cell contents. `data` holds `header.this_length` valid
    /// samples; the rest of the cell is zeroed.
    pub(crate) fn write(&mut self, azimuth: usize, state: CellState, header: &ReturnHeader, data: &[u8]) {
        let cell = &mut self.cells[azimuth];
        let len = data.len().min(cell.data.len());
        cell.data[..len].copy_from_slice(&data[..len]);
        cell.data[len..].fill(0);
        cell.header = header.clone();
        cell.state = state;
    }

    /// Copy every cell from a store of the same shape
    pub(crate) fn copy_cells_from(&mut self, other: &PolarStore) {
        self.azimuth_dim = other.azimuth_dim;
        for (dst, src) in self.cells.iter_mut().zip(&other.cells) {
            dst.state = src.state;
            dst.header = src.header.clone();
            dst.data.copy_from_slice(&src.data);
        }
    }
}
