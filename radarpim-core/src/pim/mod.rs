//! Polar Interpolated Memory
//!
//! A [`Pim`] turns a stream of returns at arbitrary azimuths into a
//! range × azimuth grid. Every return goes through the same steps:
//!
//! ```text
//!  validate ─▶ source change check ─▶ azimuth reference + offset ─▶ bucket
//!     ─▶ range reduction ─▶ interference suppression ─▶ PRF / period stats
//!     ─▶ azimuth tracking (combine | advance + fill | clear | restart)
//!     ─▶ notification check
//! ```
//!
//! Two locks protect a PIM: the data lock around the cell array and all
//! update state, and the properties lock around the configuration. An update
//! takes a snapshot of the configuration before taking the data lock, so
//! the two are never held together.

mod centroid;
mod persist;
mod store;

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::azimuth::{AziRefMode, AzimuthReferencer, NavDataProvider, NavSample, ReferenceOptions};
use crate::combine::{interpolate_sample, reduce_range, AzimuthCombine, RangeCombine, SampleCombiner};
use crate::error::PimError;
use crate::header::{
    degrees_to_azimuth, ChangeFlags, DataFlags, PimFlags, Return, ReturnHeader, ScanMode,
    SourceType, MAX_VIDEO_SIZE,
};
use crate::interference::{InterferenceFilter, MAX_INTERFERENCE_LEVEL};
use crate::packing::{read_sample, write_sample, Packing, MAX_BYTES_PER_SAMPLE};
use crate::process::{Notification, ProcessManager, RunProcess};
use crate::runtime::{DebugFlags, Runtime, FIRST_USER_COMBINE_TABLE, MAX_COMBINE_TABLES};
use crate::stats::{Statistics, StatsEstimator};

pub use centroid::Centroid;
pub use persist::{PimFileHeader, PIM_FILE_HEADER_SIZE, PIM_FILE_MAGIC, PIM_FILE_VERSION};
pub use store::{Cell, CellState, PolarStore};

/// Default number of buckets a return may step backwards and still be
/// combined rather than restart tracking
pub const DEFAULT_AZIMUTH_REPEAT: u32 = 10;

/// At most one dropped-return warning per PIM per interval
pub const UPDATE_ERROR_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// How buckets skipped by an azimuth jump are filled
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
pub enum FillMode {
    /// Zero samples
    #[default]
    Black,
    /// Copy of the new return
    Repeat,
    /// Linear blend from the last bucket to the new return
    Interpolate,
}

/// How often consumers are notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum UpdateInterval {
    /// Every n input returns
    Input(u32),
    /// Every n output azimuths advanced
    Output(u32),
}

impl Default for UpdateInterval {
    fn default() -> Self {
        UpdateInterval::Output(1)
    }
}

impl TryFrom<i32> for UpdateInterval {
    type Error = PimError;

    /// Positive counts input returns, negative counts output azimuths
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Err(PimError::invalid("updateInterval", value)),
            v if v > 0 => Ok(UpdateInterval::Input(v as u32)),
            v => Ok(UpdateInterval::Output(v.unsigned_abs())),
        }
    }
}

impl From<UpdateInterval> for i32 {
    fn from(value: UpdateInterval) -> Self {
        match value {
            UpdateInterval::Input(n) => n as i32,
            UpdateInterval::Output(n) => -(n as i32),
        }
    }
}

/// Runtime-adjustable configuration of a PIM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PimSettings {
    pub azimuth_dim: u32,
    pub range_combine: RangeCombine,
    pub azimuth_combine: AzimuthCombine,
    /// User combine table replacing the azimuth combine operation
    pub combine_table: Option<u8>,
    /// Offset added to input azimuths, in 1/65536 of a revolution
    pub azimuth_offset: u16,
    /// Apply the offset at full resolution instead of whole buckets
    pub high_res_azimuth_offset: bool,
    pub azimuth_repeat: u32,
    /// Largest forward jump that is filled, `None` for a quarter scan
    pub azimuth_clear_limit: Option<u32>,
    pub fill: bool,
    pub fill_mode: FillMode,
    pub interference_level: u8,
    pub update_interval: UpdateInterval,
    /// Force a notification after this many returns at one bucket, 0 to disable
    pub constant_azimuth_limit: u32,
    pub azi_ref_mode: AziRefMode,
    pub reference: ReferenceOptions,
}

impl Default for PimSettings {
    fn default() -> Self {
        Self {
            azimuth_dim: 0,
            range_combine: RangeCombine::Peak,
            azimuth_combine: AzimuthCombine::Peak,
            combine_table: None,
            azimuth_offset: 0,
            high_res_azimuth_offset: false,
            azimuth_repeat: DEFAULT_AZIMUTH_REPEAT,
            azimuth_clear_limit: None,
            fill: true,
            fill_mode: FillMode::Black,
            interference_level: 0,
            update_interval: UpdateInterval::default(),
            constant_azimuth_limit: 0,
            azi_ref_mode: AziRefMode::None,
            reference: ReferenceOptions::default(),
        }
    }
}

impl PimSettings {
    pub fn clear_limit(&self) -> u32 {
        self.azimuth_clear_limit.unwrap_or(self.azimuth_dim / 4)
    }

    fn validate(&self, max_azimuth_dim: u32) -> Result<(), PimError> {
        if self.azimuth_dim == 0 || self.azimuth_dim > max_azimuth_dim {
            return Err(PimError::invalid("azimuthDim", self.azimuth_dim));
        }
        if let Some(index) = self.combine_table {
            if !(FIRST_USER_COMBINE_TABLE..MAX_COMBINE_TABLES).contains(&(index as usize)) {
                return Err(PimError::invalid("combineTable", index));
            }
        }
        if self.azimuth_repeat > self.azimuth_dim {
            return Err(PimError::invalid("azimuthRepeat", self.azimuth_repeat));
        }
        if let Some(limit) = self.azimuth_clear_limit {
            if limit > self.azimuth_dim {
                return Err(PimError::invalid("azimuthClearLimit", limit));
            }
        }
        if i32::from(self.update_interval) == 0 {
            return Err(PimError::invalid("updateInterval", 0));
        }
        Ok(())
    }
}

/// Construction parameters of a PIM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PimConfig {
    #[serde(default)]
    pub name: String,
    pub range_dim: u32,
    pub max_azimuth_dim: u32,
    #[serde(default = "default_bytes_per_sample")]
    pub max_bytes_per_sample: u32,
    #[serde(default)]
    pub settings: PimSettings,
}

fn default_bytes_per_sample() -> u32 {
    1
}

impl PimConfig {
    pub fn new(range_dim: u32, azimuth_dim: u32) -> Self {
        PimConfig {
            name: String::from("pim"),
            range_dim,
            max_azimuth_dim: azimuth_dim,
            max_bytes_per_sample: 1,
            settings: PimSettings {
                azimuth_dim,
                ..Default::default()
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_max_bytes_per_sample(mut self, bps: u32) -> Self {
        self.max_bytes_per_sample = bps;
        self
    }

    pub fn with_settings(mut self, settings: PimSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// What one update produced
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateOutcome {
    /// Set when consumers are due to be told about new azimuths
    pub notification: Option<Notification>,
    /// Source or store changes detected on this return
    pub changes: ChangeFlags,
}

/// Named parameters for the string configuration interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum Parameter {
    AzimuthDim,
    RangeCombine,
    AzimuthCombine,
    CombineTable,
    AzimuthOffset,
    AzimuthOffsetDegrees,
    HighResAzimuthOffset,
    AzimuthRepeat,
    AzimuthClearLimit,
    Fill,
    FillMode,
    InterferenceLevel,
    UpdateInterval,
    ConstantAzimuthLimit,
    AziRefMode,
    UseReturnHeading,
    ExtrapolateHeading,
    CorrectPitchRoll,
}

#[derive(Debug, Clone, PartialEq)]
struct SourceSignature {
    nominal_length: u16,
    bytes_per_sample: usize,
    packing: u8,
    start_range: u32,
    end_range: u32,
    source_type: u8,
    source_code: u8,
    scan_mode: u8,
}

impl SourceSignature {
    fn of(header: &ReturnHeader, bytes_per_sample: usize) -> Self {
        SourceSignature {
            nominal_length: header.nominal_length,
            bytes_per_sample,
            packing: header.packing,
            start_range: header.start_range.to_bits(),
            end_range: header.end_range.to_bits(),
            source_type: header.source_type,
            source_code: header.source_code,
            scan_mode: header.scan_mode,
        }
    }

    fn changes_from(&self, old: &SourceSignature) -> ChangeFlags {
        let mut changes = ChangeFlags::empty();
        if self.nominal_length != old.nominal_length
            || self.bytes_per_sample != old.bytes_per_sample
            || self.packing != old.packing
        {
            changes |= ChangeFlags::DIMENSIONS;
        }
        if self.start_range != old.start_range || self.end_range != old.end_range {
            changes |= ChangeFlags::RANGE;
        }
        if self.source_type != old.source_type || self.source_code != old.source_code {
            changes |= ChangeFlags::TYPE;
        }
        if self.scan_mode != old.scan_mode {
            changes |= ChangeFlags::SCANMODE;
        }
        changes
    }
}

/// Rate limited reporting of dropped returns
#[derive(Debug, Default)]
struct ErrorReporter {
    last_report: Option<Instant>,
    suppressed: u32,
}

impl ErrorReporter {
    fn report(&mut self, name: &str, err: &PimError) {
        let now = Instant::now();
        match self.last_report {
            Some(t) if now.duration_since(t) < UPDATE_ERROR_REPORT_INTERVAL => {
                self.suppressed += 1;
            }
            _ => {
                if self.suppressed > 0 {
                    warn!(
                        "{}: dropped return: {} ({} more dropped since last report)",
                        name, err, self.suppressed
                    );
                } else {
                    warn!("{}: dropped return: {}", name, err);
                }
                self.last_report = Some(now);
                self.suppressed = 0;
            }
        }
    }
}

/// Where a return goes relative to the last updated bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    First,
    /// Same bucket or a small step back
    Combine,
    /// Forward by `delta` buckets, moving `step` (+1 or -1) per bucket
    Advance { delta: u32, step: i64 },
    /// Jump too large to fill
    Clear,
    /// Large step back
    Restart,
    /// No ordering between azimuths
    Unordered,
}

fn place(
    last: Option<u32>,
    bucket: u32,
    dim: u32,
    settings: &PimSettings,
    scan_mode: ScanMode,
    anticlockwise: bool,
) -> Placement {
    let Some(last) = last else {
        return Placement::First;
    };
    if scan_mode.is_unordered() {
        return if bucket == last {
            Placement::Combine
        } else {
            Placement::Unordered
        };
    }
    let dim = dim as i64;
    let clear_limit = settings.clear_limit() as i64;
    if scan_mode.is_sector() {
        let mut raw = (bucket as i64 - last as i64).rem_euclid(dim);
        if raw > dim / 2 {
            raw -= dim;
        }
        return match raw.abs() {
            0 => Placement::Combine,
            delta if delta <= clear_limit => Placement::Advance {
                delta: delta as u32,
                step: raw.signum(),
            },
            _ => Placement::Clear,
        };
    }

    // distance travelled in the direction of rotation, 0..dim
    let (forward, step) = if anticlockwise {
        ((last as i64 - bucket as i64).rem_euclid(dim), -1)
    } else {
        ((bucket as i64 - last as i64).rem_euclid(dim), 1)
    };
    let backward = dim - forward;
    if forward == 0 || (backward < forward && backward <= settings.azimuth_repeat as i64) {
        Placement::Combine
    } else if forward <= clear_limit {
        Placement::Advance {
            delta: forward as u32,
            step,
        }
    } else if forward <= dim / 2 {
        Placement::Clear
    } else {
        Placement::Restart
    }
}

/// Everything the update path mutates, guarded by the data lock
#[derive(Debug)]
struct PimState {
    store: PolarStore,
    /// Processed samples of the current return
    work: Vec<u8>,
    signature: Option<SourceSignature>,
    just_changed_source_type: bool,
    combiner: Option<((u64, u64, Packing, bool), SampleCombiner)>,
    last_bucket: Option<u32>,
    last_input_azimuth: Option<u16>,
    same_bucket_count: u32,
    referencer: AzimuthReferencer,
    interference: InterferenceFilter,
    estimator: StatsEstimator,
    last_header: Option<ReturnHeader>,
    sensor: Option<(ReturnHeader, Vec<u8>)>,
    input_count: u64,
    returns_since_notify: u32,
    azimuths_since_notify: u32,
    pending: Option<Notification>,
    last_return_time: Option<Instant>,
    errors: ErrorReporter,
}

impl PimState {
    fn reset_tracking(&mut self) {
        self.last_bucket = None;
        self.same_bucket_count = 0;
        self.pending = None;
        self.returns_since_notify = 0;
        self.azimuths_since_notify = 0;
    }
}

pub struct Pim {
    name: String,
    runtime: Arc<Runtime>,
    range_dim: usize,
    max_bytes_per_sample: usize,
    max_azimuth_dim: usize,
    props: RwLock<PimSettings>,
    generation: AtomicU64,
    state: Mutex<PimState>,
    stats: Statistics,
    processes: ProcessManager,
    nav: RwLock<Option<Arc<dyn NavDataProvider>>>,
}

impl std::fmt::Debug for Pim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pim")
            .field("name", &self.name)
            .field("range_dim", &self.range_dim)
            .field("azimuth_dim", &self.azimuth_dim())
            .finish_non_exhaustive()
    }
}

impl Pim {
    pub fn new(runtime: Arc<Runtime>, config: PimConfig) -> Result<Pim, PimError> {
        if config.range_dim == 0 || config.range_dim > u16::MAX as u32 {
            return Err(PimError::invalid("rangeDim", config.range_dim));
        }
        if config.max_azimuth_dim == 0 || config.max_azimuth_dim > 65536 {
            return Err(PimError::invalid("maxAzimuthDim", config.max_azimuth_dim));
        }
        let bps = config.max_bytes_per_sample as usize;
        if bps == 0 || bps > MAX_BYTES_PER_SAMPLE {
            return Err(PimError::invalid("maxBytesPerSample", bps));
        }
        // a full width cell must still fit the video size field
        if config.range_dim as usize * bps > MAX_VIDEO_SIZE {
            return Err(PimError::invalid("rangeDim", config.range_dim));
        }
        let mut settings = config.settings;
        if settings.azimuth_dim == 0 {
            settings.azimuth_dim = config.max_azimuth_dim;
        }
        settings.interference_level = settings.interference_level.min(MAX_INTERFERENCE_LEVEL);
        settings.validate(config.max_azimuth_dim)?;

        let range_dim = config.range_dim as usize;
        let max_azimuth_dim = config.max_azimuth_dim as usize;
        let store = PolarStore::new(range_dim, settings.azimuth_dim as usize, max_azimuth_dim, bps);
        debug!(
            "{}: created PIM {}x{} (max {} azimuths, {} bytes per sample)",
            config.name, range_dim, settings.azimuth_dim, max_azimuth_dim, bps
        );

        Ok(Pim {
            name: config.name,
            runtime,
            range_dim,
            max_bytes_per_sample: bps,
            max_azimuth_dim,
            props: RwLock::new(settings),
            generation: AtomicU64::new(0),
            state: Mutex::new(PimState {
                store,
                work: vec![0u8; range_dim * bps],
                signature: None,
                just_changed_source_type: false,
                combiner: None,
                last_bucket: None,
                last_input_azimuth: None,
                same_bucket_count: 0,
                referencer: AzimuthReferencer::new(),
                interference: InterferenceFilter::new(),
                estimator: StatsEstimator::new(),
                last_header: None,
                sensor: None,
                input_count: 0,
                returns_since_notify: 0,
                azimuths_since_notify: 0,
                pending: None,
                last_return_time: None,
                errors: ErrorReporter::default(),
            }),
            stats: Statistics::default(),
            processes: ProcessManager::new(),
            nav: RwLock::new(None),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current configuration
    pub fn settings(&self) -> PimSettings {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Configuration together with its generation, read under one guard
    fn snapshot(&self) -> (PimSettings, u64) {
        let props = self.props.read().unwrap_or_else(PoisonError::into_inner);
        (props.clone(), self.generation.load(Ordering::Acquire))
    }

    /// Apply a change to fields that need no validation
    fn adjust(&self, f: impl FnOnce(&mut PimSettings)) {
        let mut props = self.props.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut props);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Validate and apply a change to the configuration
    fn modify<F>(&self, f: F) -> Result<(), PimError>
    where
        F: FnOnce(&mut PimSettings) -> Result<(), PimError>,
    {
        let mut props = self.props.write().unwrap_or_else(PoisonError::into_inner);
        let mut settings = props.clone();
        f(&mut settings)?;
        settings.validate(self.max_azimuth_dim as u32)?;
        *props = settings;
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn range_dim(&self) -> usize {
        self.range_dim
    }

    pub fn azimuth_dim(&self) -> usize {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .azimuth_dim as usize
    }

    pub fn max_azimuth_dim(&self) -> usize {
        self.max_azimuth_dim
    }

    pub fn max_bytes_per_sample(&self) -> usize {
        self.max_bytes_per_sample
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    pub fn add_process(&self, process: Arc<dyn RunProcess>) {
        self.processes.add(process);
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Tell consumers about a configuration or source change
    pub fn notify_changes(&self, changes: ChangeFlags) {
        if !changes.is_empty() {
            self.processes.notify_changes(self, changes);
        }
    }

    /// Tell consumers about new azimuths
    pub fn notify(&self, notification: &Notification) {
        self.processes.notify(self, notification);
    }

    /// Process an encoded record: header followed by payload
    pub fn update_bytes(&self, record: &[u8]) -> Result<UpdateOutcome, PimError> {
        let header = match ReturnHeader::from_bytes(record) {
            Ok(header) => header,
            Err(e) => {
                self.lock_state().errors.report(&self.name, &e);
                return Err(e);
            }
        };
        let start = (header.header_size as usize).min(record.len());
        let end = (start + header.radar_video_size as usize).min(record.len());
        self.update_parts(&header, &record[start..end])
    }

    pub fn update(&self, ret: &Return) -> Result<UpdateOutcome, PimError> {
        self.update_parts(&ret.header, &ret.data)
    }

    /// Add one return to the store. Failures are logged with rate limiting
    /// and leave the store as it was.
    pub fn update_parts(&self, header: &ReturnHeader, data: &[u8]) -> Result<UpdateOutcome, PimError> {
        let (settings, generation) = self.snapshot();
        let nav = match settings.azi_ref_mode {
            AziRefMode::None => None,
            _ => self
                .nav
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .map(|p| p.nav_sample(Instant::now())),
        };

        let mut state = self.lock_state();
        let result = self.apply(&mut state, &settings, generation, header, data, nav.as_ref());
        if let Err(e) = &result {
            state.errors.report(&self.name, e);
        }
        result
    }

    fn check_source(&self, state: &mut PimState, header: &ReturnHeader, bps: usize) -> ChangeFlags {
        let signature = SourceSignature::of(header, bps);
        let changes = match &state.signature {
            None => ChangeFlags::INIT,
            Some(old) => signature.changes_from(old),
        };
        if changes.is_empty() {
            state.just_changed_source_type = false;
            return changes;
        }
        if changes.intersects(ChangeFlags::DIMENSIONS | ChangeFlags::RANGE) {
            state.store.clear(PimFlags::empty());
        }
        if state.signature.is_some() {
            info!(
                "{}: source changed ({:?}), nominal length {} packing {} scan mode {}",
                self.name,
                changes,
                header.nominal_length,
                header.packing,
                header.scan_mode()
            );
        }
        state.reset_tracking();
        state.interference.reset();
        state.estimator.reset(&self.stats);
        state.combiner = None;
        state.just_changed_source_type = true;
        state.signature = Some(signature);
        changes
    }

    fn bucket_for(&self, azimuth: u16, settings: &PimSettings, dim: u32) -> u32 {
        if settings.high_res_azimuth_offset {
            let shifted = (azimuth as u32 + settings.azimuth_offset as u32) & 0xFFFF;
            shifted * dim / 65536
        } else {
            let offset = settings.azimuth_offset as u32 * dim / 65536;
            (azimuth as u32 * dim / 65536 + offset) % dim
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        state: &mut PimState,
        settings: &PimSettings,
        generation: u64,
        header: &ReturnHeader,
        data: &[u8],
        nav: Option<&NavSample>,
    ) -> Result<UpdateOutcome, PimError> {
        header.validate()?;
        if self.runtime.debug_enabled(DebugFlags::UPDATES_HEADER) {
            trace!("{}: header {:?}", self.name, header);
        }
        if header.is_sensor_data() {
            let len = (header.radar_video_size as usize).min(data.len());
            state.sensor = Some((header.clone(), data[..len].to_vec()));
            return Ok(UpdateOutcome {
                notification: None,
                changes: ChangeFlags::SENSORDATA,
            });
        }

        let packing = header
            .packing()
            .filter(|p| p.is_storable())
            .ok_or(PimError::UnsupportedPacking(header.packing))?;
        let bps = packing.bytes_per_sample();
        if bps > self.max_bytes_per_sample {
            return Err(PimError::SampleTooWide {
                needed: bps,
                supported: self.max_bytes_per_sample,
            });
        }
        let this_length = header.this_length as usize;
        let nominal = header.nominal_length as usize;
        let needed = this_length * bps;
        if data.len() < needed {
            return Err(PimError::TooShort {
                expected: needed,
                actual: data.len(),
            });
        }

        let changes = self.check_source(state, header, bps);
        let now = Instant::now();
        let big_endian = header.data_flags.contains(DataFlags::BIG_ENDIAN);
        let anticlockwise = header.data_flags.contains(DataFlags::ANTI_CLOCKWISE);

        let key = (generation, self.runtime.table_epoch(), packing, big_endian);
        if state.combiner.as_ref().map(|(k, _)| *k) != Some(key) {
            let combiner = self.runtime.combiner(
                settings.azimuth_combine,
                settings.combine_table.map(|i| i as usize),
                packing,
                big_endian,
            );
            state.combiner = Some((key, combiner));
        }

        state.estimator.update(&self.stats, header, now);
        state.last_input_azimuth = Some(header.azimuth);

        let referenced = state.referencer.reference(
            settings.azi_ref_mode,
            header.azimuth_degrees(),
            header,
            nav,
            &settings.reference,
        );
        if self.runtime.debug_enabled(DebugFlags::NAV_DATA) && settings.azi_ref_mode != AziRefMode::None {
            debug!(
                "{}: nav {:?}, azimuth {:.2} -> {:.2}",
                self.name,
                nav,
                header.azimuth_degrees(),
                referenced.degrees
            );
        }
        let azimuth = match settings.azi_ref_mode {
            AziRefMode::None => header.azimuth,
            _ => degrees_to_azimuth(referenced.degrees),
        };
        let dim = state.store.azimuth_dim() as u32;
        let bucket = self.bucket_for(azimuth, settings, dim);

        // Range reduction into the work buffer
        let range_dim = self.range_dim;
        let (stored_nominal, stored_this) = if nominal > range_dim {
            let n = reduce_range(
                data,
                this_length,
                nominal,
                &mut state.work,
                range_dim,
                settings.range_combine,
                packing,
                bps,
                big_endian,
            );
            (range_dim, n)
        } else {
            state.work[..needed].copy_from_slice(&data[..needed]);
            state.work[needed..].fill(0);
            (nominal, this_length)
        };

        state.interference.apply(
            settings.interference_level,
            &mut state.work,
            stored_this,
            bps,
            packing,
            big_endian,
        );

        let mut stored = header.clone();
        stored.nominal_length = stored_nominal as u16;
        stored.this_length = stored_this as u16;
        stored.azimuth = bucket_azimuth(bucket, dim);
        stored.pim_flags |= referenced.flags;
        stored.set_sizes(stored_this * bps);

        let placement = place(
            state.last_bucket,
            bucket,
            dim,
            settings,
            header.scan_mode(),
            anticlockwise,
        );
        if self.runtime.debug_enabled(DebugFlags::UPDATES) {
            debug!(
                "{}: azimuth {} -> bucket {} ({:?}, last {:?})",
                self.name, header.azimuth, bucket, placement, state.last_bucket
            );
        }

        let (first_touched, touched, advanced) = match placement {
            Placement::Combine => {
                self.combine_cell(state, bucket, &stored, bps);
                state.same_bucket_count += 1;
                (bucket, 0, 0)
            }
            Placement::Advance { delta, step } => {
                if settings.fill && delta > 1 {
                    self.fill_gap(state, settings, delta, step, &stored, packing, bps, big_endian);
                }
                let PimState { store, work, .. } = &mut *state;
                store.write(bucket as usize, CellState::Data, &stored, &work[..stored_this * bps]);
                let last = state.last_bucket.unwrap_or(bucket);
                state.last_bucket = Some(bucket);
                state.same_bucket_count = 0;
                let first = if step > 0 { (last + 1) % dim } else { bucket };
                (first, delta, delta)
            }
            Placement::Clear => {
                debug!(
                    "{}: azimuth jump to {} beyond clear limit, clearing store",
                    self.name, bucket
                );
                state.store.clear(PimFlags::empty());
                self.write_direct(state, bucket, &stored, bps);
                (bucket, 1, 1)
            }
            Placement::First | Placement::Restart | Placement::Unordered => {
                self.write_direct(state, bucket, &stored, bps);
                (bucket, 1, 1)
            }
        };

        let notification = self.check_notification(state, settings, dim, first_touched, touched, advanced, placement);

        if self.runtime.debug_enabled(DebugFlags::INPUT_SUMMARY) {
            debug!(
                "{}: count {} azimuth {} length {}/{} bucket {}",
                self.name, header.count, header.azimuth, header.this_length, header.nominal_length, bucket
            );
        }
        if self.runtime.debug_enabled(DebugFlags::UPDATE_STATE) {
            debug!(
                "{}: last bucket {:?}, {} populated, pending {:?}",
                self.name,
                state.last_bucket,
                state.store.num_populated(),
                state.pending
            );
        }

        state.last_header = Some(stored);
        state.last_return_time = Some(now);
        Ok(UpdateOutcome {
            notification,
            changes,
        })
    }

    fn write_direct(&self, state: &mut PimState, bucket: u32, stored: &ReturnHeader, bps: usize) {
        let len = stored.this_length as usize * bps;
        let PimState { store, work, .. } = &mut *state;
        store.write(bucket as usize, CellState::Data, stored, &work[..len]);
        state.last_bucket = Some(bucket);
        state.same_bucket_count = 0;
    }

    /// Merge the work buffer into an occupied cell with the azimuth combine
    /// mode. Empty and gap-filled cells are simply written.
    fn combine_cell(&self, state: &mut PimState, bucket: u32, stored: &ReturnHeader, bps: usize) {
        let PimState {
            store,
            work,
            combiner,
            ..
        } = &mut *state;
        let len = stored.this_length as usize * bps;
        let cell = store.cell_mut(bucket as usize);
        if cell.state != CellState::Data {
            store.write(bucket as usize, CellState::Data, stored, &work[..len]);
            return;
        }
        match combiner.as_ref().map(|(_, c)| c) {
            None | Some(SampleCombiner::Keep) => {}
            Some(SampleCombiner::Replace) => {
                store.write(bucket as usize, CellState::Data, stored, &work[..len]);
            }
            Some(c) => {
                let samples = (cell.header.this_length).max(stored.this_length);
                let nominal = (cell.header.nominal_length).max(stored.nominal_length);
                c.combine_into(&mut cell.data, &work[..], samples as usize, bps);
                let mut header = stored.clone();
                header.this_length = samples;
                header.nominal_length = nominal;
                header.set_sizes(samples as usize * bps);
                cell.header = header;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_gap(
        &self,
        state: &mut PimState,
        settings: &PimSettings,
        delta: u32,
        step: i64,
        stored: &ReturnHeader,
        packing: Packing,
        bps: usize,
        big_endian: bool,
    ) {
        let Some(last) = state.last_bucket else {
            return;
        };
        let dim = state.store.azimuth_dim() as i64;
        let stored_this = stored.this_length as usize;

        // previous bucket contents, for interpolation
        let previous = match settings.fill_mode {
            FillMode::Interpolate => state
                .store
                .cell(last as usize)
                .filter(|c| !c.is_empty())
                .map(|c| (c.header.this_length as usize, c.data.to_vec())),
            _ => None,
        };
        let mode = match (settings.fill_mode, &previous) {
            (FillMode::Interpolate, None) => FillMode::Black,
            (mode, _) => mode,
        };

        let mut fill = vec![0u8; self.range_dim * bps];
        for k in 1..delta {
            let b = (last as i64 + step * k as i64).rem_euclid(dim) as u32;
            let mut header = stored.clone();
            header.azimuth = bucket_azimuth(b, dim as u32);
            let length = match (mode, &previous) {
                (FillMode::Repeat, _) => {
                    fill[..stored_this * bps].copy_from_slice(&state.work[..stored_this * bps]);
                    header.pim_flags |= PimFlags::REPEAT;
                    stored_this
                }
                (FillMode::Interpolate, Some((prev_this, prev))) => {
                    let t = k as f64 / delta as f64;
                    let n = (*prev_this).max(stored_this);
                    for i in 0..n {
                        let a = read_sample(prev, i, bps, big_endian);
                        let z = read_sample(&state.work, i, bps, big_endian);
                        write_sample(&mut fill, i, bps, big_endian, interpolate_sample(packing, a, z, t));
                    }
                    header.pim_flags |= PimFlags::REPEAT;
                    n
                }
                _ => {
                    fill[..stored_this * bps].fill(0);
                    header.pim_flags |= PimFlags::BLACKFILL;
                    stored_this
                }
            };
            header.this_length = length as u16;
            header.nominal_length = header.nominal_length.max(length as u16);
            header.set_sizes(length * bps);
            state
                .store
                .write(b as usize, CellState::Filled, &header, &fill[..length * bps]);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_notification(
        &self,
        state: &mut PimState,
        settings: &PimSettings,
        dim: u32,
        first_touched: u32,
        touched: u32,
        advanced: u32,
        placement: Placement,
    ) -> Option<Notification> {
        let index = state.input_count;
        state.input_count += 1;
        match state.pending.as_mut() {
            None => {
                state.pending = Some(Notification {
                    first_new_return: index,
                    first_azimuth: first_touched,
                    num_azimuths: touched.clamp(1, dim),
                })
            }
            Some(pending) => pending.num_azimuths = (pending.num_azimuths + touched).min(dim),
        }
        state.returns_since_notify += 1;
        state.azimuths_since_notify += advanced;

        let mut due = match settings.update_interval {
            UpdateInterval::Input(n) => state.returns_since_notify >= n.max(1),
            UpdateInterval::Output(n) => state.azimuths_since_notify >= n.max(1),
        };
        if placement == Placement::Combine
            && settings.constant_azimuth_limit > 0
            && state.same_bucket_count >= settings.constant_azimuth_limit
        {
            due = true;
            state.same_bucket_count = 0;
        }
        if !due {
            return None;
        }
        state.returns_since_notify = 0;
        state.azimuths_since_notify = 0;
        state.pending.take()
    }

    // Read API

    /// Copy of the return stored at `azimuth`
    pub fn get_return(&self, azimuth: u32) -> Result<Return, PimError> {
        self.with_return(azimuth, |header, data| Return {
            header: header.clone(),
            data: data.to_vec(),
        })
    }

    /// Run `f` on the stored return without copying it
    pub fn with_return<R>(&self, azimuth: u32, f: impl FnOnce(&ReturnHeader, &[u8]) -> R) -> Result<R, PimError> {
        let state = self.lock_state();
        let dim = state.store.azimuth_dim() as u32;
        let cell = state
            .store
            .cell(azimuth as usize)
            .ok_or(PimError::AzimuthOutOfRange { azimuth, dim })?;
        match cell.header() {
            Some(header) => Ok(f(header, cell.payload())),
            None => Err(PimError::NoData { azimuth }),
        }
    }

    pub fn cell_state(&self, azimuth: u32) -> Option<CellState> {
        self.lock_state()
            .store
            .cell(azimuth as usize)
            .map(|c| c.state())
    }

    pub fn num_populated(&self) -> usize {
        self.lock_state().store.num_populated()
    }

    pub fn last_return_header(&self) -> Option<ReturnHeader> {
        self.lock_state().last_header.clone()
    }

    pub fn prf(&self) -> f64 {
        self.stats.prf()
    }

    pub fn average_prf(&self) -> f64 {
        self.stats.average_prf()
    }

    pub fn reset_average_prf(&self) {
        self.stats.reset_average_prf();
    }

    pub fn average_period(&self) -> f64 {
        self.stats.average_period()
    }

    pub fn reset_average_period(&self) {
        self.stats.reset_average_period();
    }

    /// Offset in whole buckets
    pub fn azimuth_offset(&self) -> u32 {
        let settings = self.settings();
        settings.azimuth_offset as u32 * settings.azimuth_dim / 65536
    }

    /// Part of the offset below one bucket, in 1/65536 of a revolution
    pub fn azimuth_offset_remainder(&self) -> u32 {
        let settings = self.settings();
        let buckets = settings.azimuth_offset as u32 * settings.azimuth_dim / 65536;
        settings.azimuth_offset as u32 - (buckets * 65536).div_ceil(settings.azimuth_dim)
    }

    pub fn start_range(&self) -> f32 {
        self.lock_state()
            .last_header
            .as_ref()
            .map_or(0.0, |h| h.start_range)
    }

    pub fn end_range(&self) -> f32 {
        self.lock_state()
            .last_header
            .as_ref()
            .map_or(0.0, |h| h.end_range)
    }

    pub fn source_type(&self) -> SourceType {
        self.lock_state()
            .signature
            .as_ref()
            .map_or(SourceType::Unknown, |s| SourceType::from_u8(s.source_type))
    }

    pub fn source_code(&self) -> u8 {
        self.lock_state()
            .signature
            .as_ref()
            .map_or(0, |s| s.source_code)
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.lock_state()
            .signature
            .as_ref()
            .map_or(ScanMode::Auto, |s| ScanMode::from_u8(s.scan_mode))
    }

    pub fn just_changed_source_type(&self) -> bool {
        self.lock_state().just_changed_source_type
    }

    /// Raw azimuth of the last input return
    pub fn last_input_azimuth(&self) -> Option<u16> {
        self.lock_state().last_input_azimuth
    }

    /// Last bucket the store advanced to
    pub fn last_updated_azimuth(&self) -> Option<u32> {
        self.lock_state().last_bucket
    }

    pub fn last_nominal_length(&self) -> u16 {
        self.lock_state()
            .signature
            .as_ref()
            .map_or(0, |s| s.nominal_length)
    }

    pub fn last_sensor_specific_data(&self) -> Option<(ReturnHeader, Vec<u8>)> {
        self.lock_state().sensor.clone()
    }

    pub fn set_sensor_specific_data(&self, header: &ReturnHeader, data: &[u8]) {
        self.lock_state().sensor = Some((header.clone(), data.to_vec()));
    }

    /// Input returns processed so far
    pub fn num_returns_processed(&self) -> u64 {
        self.lock_state().input_count
    }

    pub fn ms_since_last_return(&self) -> Option<u64> {
        self.lock_state()
            .last_return_time
            .map(|t| t.elapsed().as_millis() as u64)
    }

    /// Move the last updated bucket, e.g. after filling the store externally
    pub fn update_azimuth_in_store(&self, azimuth: u32) {
        let mut state = self.lock_state();
        let dim = state.store.azimuth_dim() as u32;
        state.last_bucket = Some(azimuth % dim);
    }

    /// Empty every cell and restart tracking and statistics, keeping the
    /// `preserve` PIM flags in each cell header
    pub fn clear(&self, preserve: PimFlags) {
        let mut state = self.lock_state();
        state.store.clear(preserve);
        state.reset_tracking();
        state.interference.reset();
        state.estimator.reset(&self.stats);
    }

    /// Run `f` with the cell array locked
    pub fn with_store<R>(&self, f: impl FnOnce(&PolarStore) -> R) -> R {
        f(&self.lock_state().store)
    }

    // Configuration

    pub fn set_azimuth_dim(&self, azimuth_dim: u32) -> Result<(), PimError> {
        self.modify(|s| {
            if s.azimuth_repeat > azimuth_dim {
                s.azimuth_repeat = azimuth_dim;
            }
            if s.azimuth_clear_limit.is_some_and(|l| l > azimuth_dim) {
                s.azimuth_clear_limit = Some(azimuth_dim);
            }
            s.azimuth_dim = azimuth_dim;
            Ok(())
        })?;
        let mut state = self.lock_state();
        state.store.set_azimuth_dim(azimuth_dim as usize);
        state.reset_tracking();
        Ok(())
    }

    pub fn set_range_combine(&self, mode: RangeCombine) {
        self.adjust(|s| s.range_combine = mode);
    }

    pub fn range_combine(&self) -> RangeCombine {
        self.settings().range_combine
    }

    pub fn set_azimuth_combine(&self, mode: AzimuthCombine) {
        self.adjust(|s| s.azimuth_combine = mode);
    }

    pub fn azimuth_combine(&self) -> AzimuthCombine {
        self.settings().azimuth_combine
    }

    /// Use a user combine table registered in the runtime, or `None` for
    /// the built-in operation
    pub fn set_combine_table(&self, index: Option<u8>) -> Result<(), PimError> {
        self.modify(|s| {
            s.combine_table = index;
            Ok(())
        })
    }

    /// Offset in buckets, may be negative
    pub fn set_azimuth_offset(&self, buckets: i32) -> Result<(), PimError> {
        self.modify(|s| {
            let dim = s.azimuth_dim as i64;
            let buckets = (buckets as i64).rem_euclid(dim);
            s.azimuth_offset = ((buckets * 65536 + dim - 1) / dim) as u16;
            Ok(())
        })
    }

    /// Offset in degrees, kept at full resolution
    pub fn set_azimuth_offset_degrees(&self, degrees: f64) -> Result<(), PimError> {
        if !degrees.is_finite() {
            return Err(PimError::invalid("azimuthOffsetDegrees", degrees));
        }
        self.modify(|s| {
            s.azimuth_offset = degrees_to_azimuth(degrees);
            Ok(())
        })
    }

    pub fn azimuth_offset_degrees(&self) -> f64 {
        self.settings().azimuth_offset as f64 * 360.0 / 65536.0
    }

    pub fn set_high_res_azimuth_offset(&self, enable: bool) {
        self.adjust(|s| s.high_res_azimuth_offset = enable);
    }

    pub fn set_azimuth_repeat(&self, repeat: u32) -> Result<(), PimError> {
        self.modify(|s| {
            s.azimuth_repeat = repeat;
            Ok(())
        })
    }

    pub fn azimuth_repeat(&self) -> u32 {
        self.settings().azimuth_repeat
    }

    pub fn set_azimuth_clear_limit(&self, limit: u32) -> Result<(), PimError> {
        self.modify(|s| {
            s.azimuth_clear_limit = Some(limit);
            Ok(())
        })
    }

    pub fn azimuth_clear_limit(&self) -> u32 {
        self.settings().clear_limit()
    }

    pub fn set_fill(&self, enable: bool) {
        self.adjust(|s| s.fill = enable);
    }

    pub fn fill(&self) -> bool {
        self.settings().fill
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.adjust(|s| s.fill_mode = mode);
    }

    /// Levels above the maximum are limited to it
    pub fn set_interference_level(&self, level: u8) {
        self.adjust(|s| s.interference_level = level.min(MAX_INTERFERENCE_LEVEL));
    }

    pub fn interference_level(&self) -> u8 {
        self.settings().interference_level
    }

    pub fn set_update_interval(&self, interval: UpdateInterval) -> Result<(), PimError> {
        match interval {
            UpdateInterval::Input(0) | UpdateInterval::Output(0) => {
                Err(PimError::invalid("updateInterval", 0))
            }
            _ => self.modify(|s| {
                s.update_interval = interval;
                Ok(())
            }),
        }
    }

    pub fn update_interval(&self) -> UpdateInterval {
        self.settings().update_interval
    }

    pub fn set_constant_azimuth_limit(&self, limit: u32) {
        self.adjust(|s| s.constant_azimuth_limit = limit);
    }

    pub fn set_azi_ref_mode(&self, mode: AziRefMode) {
        self.adjust(|s| s.azi_ref_mode = mode);
    }

    pub fn azi_ref_mode(&self) -> AziRefMode {
        self.settings().azi_ref_mode
    }

    pub fn set_reference_options(&self, options: ReferenceOptions) {
        self.adjust(|s| s.reference = options);
    }

    /// Attach navigation data and select the referencing mode
    pub fn north_reference(&self, nav: Option<Arc<dyn NavDataProvider>>, mode: AziRefMode) {
        *self.nav.write().unwrap_or_else(PoisonError::into_inner) = nav;
        self.set_azi_ref_mode(mode);
        self.lock_state().referencer.reset();
    }

    /// Replace the whole configuration. A different azimuth dimension clears
    /// the store.
    pub fn apply_settings(&self, settings: PimSettings) -> Result<(), PimError> {
        let dim = settings.azimuth_dim;
        let previous = self.azimuth_dim() as u32;
        self.modify(|s| {
            *s = settings;
            s.interference_level = s.interference_level.min(MAX_INTERFERENCE_LEVEL);
            Ok(())
        })?;
        if dim != previous {
            let mut state = self.lock_state();
            state.store.set_azimuth_dim(dim as usize);
            state.reset_tracking();
        }
        Ok(())
    }

    /// Set a parameter by name, see [`Parameter`]
    pub fn set_parameter(&self, name: &str, value: &str) -> Result<(), PimError> {
        let param = Parameter::from_str(name).map_err(|_| PimError::UnknownParameter(name.to_string()))?;
        let bad = || PimError::invalid(name, value);
        let number = || value.trim().parse::<i64>().map_err(|_| bad());
        let flag = || match value.trim() {
            "1" | "true" | "on" => Ok(true),
            "0" | "false" | "off" => Ok(false),
            _ => Err(bad()),
        };
        match param {
            Parameter::AzimuthDim => self.set_azimuth_dim(u32::try_from(number()?).map_err(|_| bad())?),
            Parameter::RangeCombine => {
                let mode = parse_enum(value, RangeCombine::from_u8).ok_or_else(bad)?;
                self.set_range_combine(mode);
                Ok(())
            }
            Parameter::AzimuthCombine => {
                let mode = parse_enum(value, AzimuthCombine::from_u8).ok_or_else(bad)?;
                self.set_azimuth_combine(mode);
                Ok(())
            }
            Parameter::CombineTable => match number()? {
                n if n < 0 => self.set_combine_table(None),
                n => self.set_combine_table(Some(u8::try_from(n).map_err(|_| bad())?)),
            },
            Parameter::AzimuthOffset => self.set_azimuth_offset(i32::try_from(number()?).map_err(|_| bad())?),
            Parameter::AzimuthOffsetDegrees => {
                self.set_azimuth_offset_degrees(value.trim().parse().map_err(|_| bad())?)
            }
            Parameter::HighResAzimuthOffset => {
                self.set_high_res_azimuth_offset(flag()?);
                Ok(())
            }
            Parameter::AzimuthRepeat => self.set_azimuth_repeat(u32::try_from(number()?).map_err(|_| bad())?),
            Parameter::AzimuthClearLimit => {
                self.set_azimuth_clear_limit(u32::try_from(number()?).map_err(|_| bad())?)
            }
            Parameter::Fill => {
                self.set_fill(flag()?);
                Ok(())
            }
            Parameter::FillMode => {
                self.set_fill_mode(FillMode::from_str(value.trim()).map_err(|_| bad())?);
                Ok(())
            }
            Parameter::InterferenceLevel => {
                self.set_interference_level(u8::try_from(number()?).map_err(|_| bad())?);
                Ok(())
            }
            Parameter::UpdateInterval => {
                let n = i32::try_from(number()?).map_err(|_| bad())?;
                self.set_update_interval(UpdateInterval::try_from(n)?)
            }
            Parameter::ConstantAzimuthLimit => {
                self.set_constant_azimuth_limit(u32::try_from(number()?).map_err(|_| bad())?);
                Ok(())
            }
            Parameter::AziRefMode => {
                let mode = parse_enum(value, AziRefMode::from_u8).ok_or_else(bad)?;
                self.set_azi_ref_mode(mode);
                Ok(())
            }
            Parameter::UseReturnHeading => {
                let enable = flag()?;
                self.modify(|s| {
                    s.reference.use_return_heading = enable;
                    Ok(())
                })
            }
            Parameter::ExtrapolateHeading => {
                let enable = flag()?;
                self.modify(|s| {
                    s.reference.extrapolate_heading = enable;
                    Ok(())
                })
            }
            Parameter::CorrectPitchRoll => {
                let enable = flag()?;
                self.modify(|s| {
                    s.reference.correct_pitch_roll = enable;
                    Ok(())
                })
            }
        }
    }

    /// Current value of a parameter as a string
    pub fn get_parameter(&self, name: &str) -> Result<String, PimError> {
        let param = Parameter::from_str(name).map_err(|_| PimError::UnknownParameter(name.to_string()))?;
        let s = self.settings();
        let flag = |b: bool| String::from(if b { "1" } else { "0" });
        Ok(match param {
            Parameter::AzimuthDim => s.azimuth_dim.to_string(),
            Parameter::RangeCombine => s.range_combine.to_string(),
            Parameter::AzimuthCombine => s.azimuth_combine.to_string(),
            Parameter::CombineTable => s.combine_table.map_or(-1, |i| i as i32).to_string(),
            Parameter::AzimuthOffset => self.azimuth_offset().to_string(),
            Parameter::AzimuthOffsetDegrees => self.azimuth_offset_degrees().to_string(),
            Parameter::HighResAzimuthOffset => flag(s.high_res_azimuth_offset),
            Parameter::AzimuthRepeat => s.azimuth_repeat.to_string(),
            Parameter::AzimuthClearLimit => s.clear_limit().to_string(),
            Parameter::Fill => flag(s.fill),
            Parameter::FillMode => s.fill_mode.to_string(),
            Parameter::InterferenceLevel => s.interference_level.to_string(),
            Parameter::UpdateInterval => i32::from(s.update_interval).to_string(),
            Parameter::ConstantAzimuthLimit => s.constant_azimuth_limit.to_string(),
            Parameter::AziRefMode => s.azi_ref_mode.to_string(),
            Parameter::UseReturnHeading => flag(s.reference.use_return_heading),
            Parameter::ExtrapolateHeading => flag(s.reference.extrapolate_heading),
            Parameter::CorrectPitchRoll => flag(s.reference.correct_pitch_roll),
        })
    }

    // Bulk operations

    /// Copy configuration and every cell from another PIM of the same range
    /// dimension and sample size
    pub fn copy_from(&self, other: &Pim) -> Result<(), PimError> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        self.check_compatible(other)?;
        self.apply_settings(other.settings())?;
        let (cells, last_bucket) = {
            let src = other.lock_state();
            (src.store.clone(), src.last_bucket)
        };
        let mut state = self.lock_state();
        state.store.copy_cells_from(&cells);
        state.reset_tracking();
        state.last_bucket = last_bucket;
        Ok(())
    }

    fn check_compatible(&self, other: &Pim) -> Result<(), PimError> {
        if self.range_dim != other.range_dim {
            return Err(PimError::Incompatible(format!(
                "range dimension {} vs {}",
                self.range_dim, other.range_dim
            )));
        }
        if self.max_bytes_per_sample != other.max_bytes_per_sample {
            return Err(PimError::Incompatible(format!(
                "bytes per sample {} vs {}",
                self.max_bytes_per_sample, other.max_bytes_per_sample
            )));
        }
        if other.azimuth_dim() > self.max_azimuth_dim {
            return Err(PimError::Incompatible(format!(
                "azimuth dimension {} exceeds maximum {}",
                other.azimuth_dim(),
                self.max_azimuth_dim
            )));
        }
        Ok(())
    }

    /// `Ok` when configuration and every cell match
    pub fn compare_with(&self, other: &Pim) -> Result<(), PimError> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        self.check_compatible(other)?;
        if self.settings() != other.settings() {
            return Err(PimError::Differs("settings".to_string()));
        }
        let theirs = other.lock_state().store.clone();
        let ours = self.lock_state();
        for (azimuth, (a, b)) in ours.store.cells().zip(theirs.cells()).enumerate() {
            if a.state() != b.state() || a.header() != b.header() || a.payload() != b.payload() {
                return Err(PimError::Differs(format!("azimuth {}", azimuth)));
            }
        }
        Ok(())
    }
}

/// Start of a bucket in 16 bit azimuth units
fn bucket_azimuth(bucket: u32, dim: u32) -> u16 {
    (bucket as u64 * 65536 / dim.max(1) as u64) as u16
}

/// Parse an enum by name or by its numeric code
fn parse_enum<T: FromStr>(value: &str, from_code: fn(u8) -> Option<T>) -> Option<T> {
    let value = value.trim();
    match value.parse::<u8>() {
        Ok(code) => from_code(code),
        Err(_) => T::from_str(value).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::CombineTable;
    use crate::header::SENSOR_MAGIC1;

    fn pim(range_dim: u32, azimuth_dim: u32) -> Pim {
        Pim::new(Arc::new(Runtime::new()), PimConfig::new(range_dim, azimuth_dim)).unwrap()
    }

    /// A return landing in `bucket` of a store with `dim` buckets
    fn ret(bucket: u32, dim: u32, data: Vec<u8>) -> Return {
        let header = ReturnHeader {
            azimuth: (bucket as u64 * 65536 / dim as u64) as u16,
            nominal_length: data.len() as u16,
            this_length: data.len() as u16,
            time_interval: 1000,
            ..Default::default()
        };
        Return::new(header, data)
    }

    #[test]
    fn test_config_validation() {
        let runtime = Arc::new(Runtime::new());
        assert!(Pim::new(runtime.clone(), PimConfig::new(0, 16)).is_err());
        assert!(Pim::new(runtime.clone(), PimConfig::new(16, 16).with_max_bytes_per_sample(3)).is_err());
        let mut config = PimConfig::new(16, 16);
        config.settings.azimuth_dim = 32;
        assert!(Pim::new(runtime, config).is_err());
    }

    #[test]
    fn test_first_write_and_no_data() {
        let pim = pim(8, 16);
        let outcome = pim.update(&ret(3, 16, vec![7; 8])).unwrap();
        assert_eq!(outcome.changes, ChangeFlags::INIT);
        let n = outcome.notification.unwrap();
        assert_eq!((n.first_new_return, n.first_azimuth, n.num_azimuths), (0, 3, 1));

        let stored = pim.get_return(3).unwrap();
        assert_eq!(stored.data, vec![7; 8]);
        assert_eq!(stored.header.this_length, 8);
        assert_eq!(pim.get_return(4), Err(PimError::NoData { azimuth: 4 }));
        assert!(matches!(
            pim.get_return(16),
            Err(PimError::AzimuthOutOfRange { .. })
        ));
    }

    #[test]
    fn test_repeat_modes() {
        let a = vec![10u8, 200, 30, 40];
        let b = vec![50u8, 20, 30, 90];
        let run = |mode: AzimuthCombine| {
            let pim = pim(4, 16);
            pim.set_azimuth_combine(mode);
            pim.update(&ret(5, 16, a.clone())).unwrap();
            pim.update(&ret(5, 16, b.clone())).unwrap();
            pim.get_return(5).unwrap().data
        };
        assert_eq!(run(AzimuthCombine::NoCombine), a);
        assert_eq!(run(AzimuthCombine::Overwrite), b);
        assert_eq!(run(AzimuthCombine::Peak), vec![50, 200, 30, 90]);
        assert_eq!(run(AzimuthCombine::Min), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_user_table_registered_after_first_use() {
        let pim = pim(2, 64);
        pim.set_combine_table(Some(5)).unwrap();
        pim.update(&ret(3, 64, vec![10, 20])).unwrap();
        pim.update(&ret(3, 64, vec![30, 5])).unwrap();
        assert_eq!(pim.get_return(3).unwrap().data, vec![30, 20]);

        pim.runtime()
            .set_user_combine_table(5, CombineTable::from_fn(|_, _| 42))
            .unwrap();
        pim.update(&ret(3, 64, vec![1, 1])).unwrap();
        assert_eq!(pim.get_return(3).unwrap().data, vec![42, 42]);
    }

    #[test]
    fn test_mode_change_during_updates_takes_effect() {
        let pim = Arc::new(pim(4, 64));
        let toggler = {
            let pim = pim.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let mode = if i % 2 == 0 {
                        AzimuthCombine::NoCombine
                    } else {
                        AzimuthCombine::Peak
                    };
                    pim.set_azimuth_combine(mode);
                }
                pim.set_azimuth_combine(AzimuthCombine::Overwrite);
            })
        };
        for _ in 0..500 {
            pim.update(&ret(0, 64, vec![200; 4])).unwrap();
        }
        toggler.join().unwrap();
        pim.update(&ret(0, 64, vec![7; 4])).unwrap();
        assert_eq!(pim.get_return(0).unwrap().data, vec![7; 4]);
    }

    #[test]
    fn test_backward_within_repeat_does_not_regress() {
        let pim = pim(4, 64);
        pim.update(&ret(5, 64, vec![1; 4])).unwrap();
        pim.update(&ret(3, 64, vec![2; 4])).unwrap();
        assert_eq!(pim.last_updated_azimuth(), Some(5));
        assert_eq!(pim.get_return(3).unwrap().data, vec![2; 4]);
    }

    #[test]
    fn test_backward_beyond_repeat_restarts() {
        let pim = pim(4, 64);
        pim.update(&ret(30, 64, vec![1; 4])).unwrap();
        pim.update(&ret(10, 64, vec![2; 4])).unwrap();
        assert_eq!(pim.last_updated_azimuth(), Some(10));
        assert_eq!(pim.num_populated(), 2);
    }

    #[test]
    fn test_fill_and_clear() {
        let pim = pim(4, 64);
        assert_eq!(pim.azimuth_clear_limit(), 16);
        pim.update(&ret(0, 64, vec![9; 4])).unwrap();
        let n = pim.update(&ret(10, 64, vec![9; 4])).unwrap().notification.unwrap();
        assert_eq!((n.first_azimuth, n.num_azimuths), (1, 10));
        for b in 1..10 {
            assert_eq!(pim.cell_state(b), Some(CellState::Filled));
            let r = pim.get_return(b).unwrap();
            assert!(r.header.pim_flags.contains(PimFlags::BLACKFILL));
            assert_eq!(r.data, vec![0; 4]);
        }

        pim.update(&ret(40, 64, vec![9; 4])).unwrap();
        assert_eq!(pim.num_populated(), 1);
        assert!(pim.get_return(40).is_ok());
    }

    #[test]
    fn test_clear_limit_beyond_half_scan() {
        let pim = pim(4, 64);
        pim.set_azimuth_clear_limit(60).unwrap();
        pim.update(&ret(0, 64, vec![9; 4])).unwrap();
        let n = pim.update(&ret(40, 64, vec![9; 4])).unwrap().notification.unwrap();
        assert_eq!((n.first_azimuth, n.num_azimuths), (1, 40));
        for b in 1..40 {
            assert_eq!(pim.cell_state(b), Some(CellState::Filled), "bucket {}", b);
        }
        assert_eq!(pim.num_populated(), 41);
        assert_eq!(pim.last_updated_azimuth(), Some(40));

        // two back is still a repeat, not a fill round the whole scan
        pim.update(&ret(38, 64, vec![9; 4])).unwrap();
        assert_eq!(pim.last_updated_azimuth(), Some(40));
        assert_eq!(pim.num_populated(), 41);
    }

    #[test]
    fn test_jump_past_half_scan_is_a_step_back() {
        let pim = pim(4, 64);
        pim.update(&ret(4, 64, vec![9; 4])).unwrap();
        pim.update(&ret(44, 64, vec![9; 4])).unwrap();
        assert_eq!(pim.num_populated(), 2);
        assert_eq!(pim.last_updated_azimuth(), Some(44));
    }

    fn scanning(bucket: u32, mode: ScanMode) -> Return {
        let mut r = ret(bucket, 64, vec![9; 4]);
        r.header.scan_mode = mode as u8;
        r
    }

    #[test]
    fn test_sector_scan_fills_both_ways() {
        for mode in [ScanMode::Sector, ScanMode::SectorFlyBack] {
            let pim = pim(4, 64);
            pim.update(&scanning(10, mode)).unwrap();
            pim.update(&scanning(14, mode)).unwrap();
            assert_eq!(pim.num_populated(), 5, "{}", mode);

            // sweeping back is new data, filled rather than combined
            pim.update(&scanning(6, mode)).unwrap();
            assert_eq!(pim.last_updated_azimuth(), Some(6), "{}", mode);
            for b in 7..10 {
                assert_eq!(pim.cell_state(b), Some(CellState::Filled), "{} bucket {}", mode, b);
            }
            assert_eq!(pim.num_populated(), 9, "{}", mode);

            // 20 back is past the clear limit of 16
            pim.update(&scanning(50, mode)).unwrap();
            assert_eq!(pim.num_populated(), 1, "{}", mode);
            assert_eq!(pim.last_updated_azimuth(), Some(50));
        }
    }

    #[test]
    fn test_unordered_scan_never_fills_or_clears() {
        for mode in [ScanMode::Random, ScanMode::NoAziData] {
            let pim = pim(4, 64);
            for b in [0, 10, 50, 30] {
                pim.update(&scanning(b, mode)).unwrap();
            }
            assert_eq!(pim.num_populated(), 4, "{}", mode);
            assert_eq!(pim.cell_state(5), Some(CellState::Empty));
            assert_eq!(pim.cell_state(40), Some(CellState::Empty));
            assert_eq!(pim.last_updated_azimuth(), Some(30));

            pim.update(&scanning(30, mode)).unwrap();
            assert_eq!(pim.num_populated(), 4, "{}", mode);
        }
    }

    #[test]
    fn test_fill_disabled() {
        let pim = pim(4, 64);
        pim.set_fill(false);
        pim.update(&ret(0, 64, vec![9; 4])).unwrap();
        pim.update(&ret(5, 64, vec![9; 4])).unwrap();
        assert_eq!(pim.num_populated(), 2);
    }

    #[test]
    fn test_fill_modes() {
        let pim = pim(2, 64);
        pim.set_fill_mode(FillMode::Repeat);
        pim.update(&ret(0, 64, vec![0, 0])).unwrap();
        pim.update(&ret(4, 64, vec![100, 40])).unwrap();
        assert_eq!(pim.get_return(2).unwrap().data, vec![100, 40]);

        pim.set_fill_mode(FillMode::Interpolate);
        pim.update(&ret(8, 64, vec![0, 0])).unwrap();
        assert_eq!(pim.get_return(5).unwrap().data, vec![75, 30]);
        assert_eq!(pim.get_return(6).unwrap().data, vec![50, 20]);
        // a real return replaces gap data instead of combining with it
        pim.update(&ret(6, 64, vec![1, 1])).unwrap();
        assert_eq!(pim.get_return(6).unwrap().data, vec![1, 1]);
    }

    #[test]
    fn test_anticlockwise() {
        let pim = pim(2, 64);
        let mut r = ret(10, 64, vec![1, 1]);
        r.header.data_flags = DataFlags::ANTI_CLOCKWISE;
        pim.update(&r).unwrap();
        let mut r = ret(7, 64, vec![1, 1]);
        r.header.data_flags = DataFlags::ANTI_CLOCKWISE;
        let n = pim.update(&r).unwrap().notification.unwrap();
        assert_eq!(pim.last_updated_azimuth(), Some(7));
        assert_eq!((n.first_azimuth, n.num_azimuths), (7, 3));
        assert_eq!(pim.cell_state(8), Some(CellState::Filled));
    }

    #[test]
    fn test_cells_fit_the_video_size_field() {
        let runtime = Arc::new(Runtime::new());
        let wide = PimConfig::new(40000, 64).with_max_bytes_per_sample(2);
        assert!(matches!(
            Pim::new(runtime.clone(), wide),
            Err(PimError::InvalidParameter { .. })
        ));
        assert!(Pim::new(runtime.clone(), PimConfig::new(40000, 64)).is_ok());

        let samples = 32767u16;
        let pim = Pim::new(runtime, PimConfig::new(samples as u32, 64).with_max_bytes_per_sample(2)).unwrap();
        let header = ReturnHeader {
            nominal_length: samples,
            this_length: samples,
            packing: Packing::Raw16 as u8,
            ..Default::default()
        };
        pim.update(&Return::new(header, vec![0x5A; samples as usize * 2])).unwrap();
        let stored = pim.get_return(0).unwrap();
        assert_eq!(stored.header.this_length, samples);
        assert_eq!(stored.header.radar_video_size, 65534);
        assert_eq!(stored.data.len(), 65534);
        assert!(stored.data.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_range_reduction() {
        let pim = pim(4, 16);
        let mut r = ret(0, 16, vec![1, 9, 4, 4, 7, 3, 0, 0]);
        r.header.this_length = 6;
        let stored = {
            pim.update(&r).unwrap();
            pim.get_return(0).unwrap()
        };
        assert_eq!(stored.header.nominal_length, 4);
        assert_eq!(stored.header.this_length, 3);
        assert_eq!(stored.data, vec![9, 4, 7]);
    }

    #[test]
    fn test_offset() {
        let pim = pim(2, 2048);
        pim.set_azimuth_offset(100).unwrap();
        assert_eq!(pim.azimuth_offset(), 100);
        assert_eq!(pim.azimuth_offset_remainder(), 0);
        pim.update(&ret(10, 2048, vec![1, 1])).unwrap();
        assert!(pim.get_return(110).is_ok());
        assert!(pim.get_return(10).is_err());

        pim.set_azimuth_offset(-1).unwrap();
        assert_eq!(pim.azimuth_offset(), 2047);
    }

    #[test]
    fn test_high_res_offset() {
        let pim = pim(2, 16);
        pim.set_high_res_azimuth_offset(true);
        pim.set_azimuth_offset_degrees(11.25).unwrap();
        assert_eq!(pim.azimuth_offset(), 0);
        assert_eq!(pim.azimuth_offset_remainder(), 2048);
        // 12 degrees + 11.25 lands in bucket 1 (22.5 .. 45)
        let mut r = ret(0, 16, vec![1, 1]);
        r.header.azimuth = degrees_to_azimuth(12.0);
        pim.update(&r).unwrap();
        assert!(pim.get_return(1).is_ok());
    }

    #[test]
    fn test_source_change_clears() {
        let pim = pim(8, 16);
        pim.update(&ret(0, 16, vec![1; 8])).unwrap();
        pim.update(&ret(1, 16, vec![1; 8])).unwrap();
        let outcome = pim.update(&ret(2, 16, vec![1; 4])).unwrap();
        assert_eq!(outcome.changes, ChangeFlags::DIMENSIONS);
        assert!(pim.just_changed_source_type());
        assert_eq!(pim.num_populated(), 1);
        assert_eq!(pim.last_nominal_length(), 4);

        let mut r = ret(3, 16, vec![1; 4]);
        r.header.source_type = SourceType::Simulator as u8;
        assert_eq!(pim.update(&r).unwrap().changes, ChangeFlags::TYPE);
        assert_eq!(pim.num_populated(), 2);
        assert_eq!(pim.source_type(), SourceType::Simulator);
    }

    #[test]
    fn test_malformed_returns() {
        let pim = pim(4, 16);
        let mut r = ret(0, 16, vec![1; 4]);
        r.header.magic2 = 0;
        assert!(matches!(pim.update(&r), Err(PimError::BadMagic { .. })));

        let mut r = ret(0, 16, vec![1; 4]);
        r.header.packing = Packing::Raw4 as u8;
        assert_eq!(pim.update(&r), Err(PimError::UnsupportedPacking(1)));

        let mut r = ret(0, 16, vec![1; 8]);
        r.header.packing = Packing::Raw16 as u8;
        assert!(matches!(pim.update(&r), Err(PimError::SampleTooWide { .. })));

        let mut r = ret(0, 16, vec![1; 4]);
        r.data.truncate(2);
        assert!(matches!(pim.update(&r), Err(PimError::TooShort { .. })));
        assert_eq!(pim.num_populated(), 0);
    }

    #[test]
    fn test_sensor_data() {
        let pim = pim(4, 16);
        let header = ReturnHeader {
            magic: SENSOR_MAGIC1,
            ..Default::default()
        };
        let r = Return::new(header, vec![1, 2, 3]);
        let outcome = pim.update(&r).unwrap();
        assert_eq!(outcome.changes, ChangeFlags::SENSORDATA);
        assert_eq!(pim.last_sensor_specific_data().unwrap().1, vec![1, 2, 3]);
        assert_eq!(pim.num_populated(), 0);
    }

    #[test]
    fn test_update_interval() {
        let pim = pim(2, 64);
        pim.set_update_interval(UpdateInterval::Output(4)).unwrap();
        let mut notes = Vec::new();
        for b in 0..8 {
            if let Some(n) = pim.update(&ret(b, 64, vec![1, 1])).unwrap().notification {
                notes.push(n);
            }
        }
        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].first_azimuth, notes[0].num_azimuths), (0, 4));
        assert_eq!((notes[1].first_azimuth, notes[1].num_azimuths), (4, 4));
        assert_eq!(notes[1].first_new_return, 4);

        pim.set_update_interval(UpdateInterval::Input(2)).unwrap();
        let a = pim.update(&ret(8, 64, vec![1, 1])).unwrap().notification;
        let b = pim.update(&ret(8, 64, vec![1, 1])).unwrap().notification;
        assert!(a.is_none());
        assert_eq!(b.unwrap().num_azimuths, 1);
        assert!(pim.set_update_interval(UpdateInterval::Input(0)).is_err());
    }

    #[test]
    fn test_constant_azimuth_limit() {
        let pim = pim(2, 64);
        pim.set_constant_azimuth_limit(3);
        assert!(pim.update(&ret(0, 64, vec![1, 1])).unwrap().notification.is_some());
        let mut count = 0;
        for _ in 0..6 {
            if pim.update(&ret(0, 64, vec![1, 1])).unwrap().notification.is_some() {
                count += 1;
            }
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_interference_suppression() {
        let pim = pim(3, 64);
        pim.set_interference_level(5);
        assert_eq!(pim.interference_level(), 3);
        pim.set_interference_level(1);
        pim.update(&ret(0, 64, vec![10, 10, 10])).unwrap();
        pim.update(&ret(1, 64, vec![10, 250, 10])).unwrap();
        assert_eq!(pim.get_return(1).unwrap().data, vec![10, 10, 10]);
    }

    #[test]
    fn test_prf() {
        let pim = pim(2, 64);
        for i in 0..200u32 {
            pim.update(&ret(i % 64, 64, vec![1, 1])).unwrap();
        }
        assert_eq!(pim.prf(), 1000.0);
        assert!((pim.average_prf() - 1000.0).abs() < 1e-9);
        pim.reset_average_prf();
        assert_eq!(pim.average_prf(), 0.0);
    }

    #[test]
    fn test_clear_resets() {
        let pim = pim(2, 16);
        pim.update(&ret(1, 16, vec![1, 1])).unwrap();
        pim.clear(PimFlags::empty());
        assert_eq!(pim.num_populated(), 0);
        assert_eq!(pim.last_updated_azimuth(), None);
        assert_eq!(pim.prf(), 0.0);
    }

    #[test]
    fn test_set_azimuth_dim() {
        let pim = Pim::new(
            Arc::new(Runtime::new()),
            PimConfig {
                max_azimuth_dim: 64,
                ..PimConfig::new(4, 32)
            },
        )
        .unwrap();
        pim.update(&ret(1, 32, vec![1; 4])).unwrap();
        pim.set_azimuth_dim(64).unwrap();
        assert_eq!(pim.azimuth_dim(), 64);
        assert_eq!(pim.num_populated(), 0);
        assert!(pim.set_azimuth_dim(65).is_err());
        assert_eq!(pim.azimuth_dim(), 64);
    }

    #[test]
    fn test_parameters() {
        let pim = pim(2, 64);
        pim.set_parameter("azimuthCombine", "Min").unwrap();
        assert_eq!(pim.azimuth_combine(), AzimuthCombine::Min);
        pim.set_parameter("rangeCombine", "4").unwrap();
        assert_eq!(pim.range_combine(), RangeCombine::Smooth);
        pim.set_parameter("updateInterval", "-3").unwrap();
        assert_eq!(pim.update_interval(), UpdateInterval::Output(3));
        pim.set_parameter("fill", "off").unwrap();
        assert_eq!(pim.get_parameter("fill").unwrap(), "0");
        pim.set_parameter("fillMode", "Interpolate").unwrap();
        pim.set_parameter("aziRefMode", "NorthFromHeading").unwrap();
        assert_eq!(pim.get_parameter("aziRefMode").unwrap(), "NorthFromHeading");
        assert_eq!(pim.get_parameter("azimuthRepeat").unwrap(), "10");

        assert!(matches!(
            pim.set_parameter("bogus", "1"),
            Err(PimError::UnknownParameter(_))
        ));
        assert!(matches!(
            pim.set_parameter("azimuthRepeat", "many"),
            Err(PimError::InvalidParameter { .. })
        ));
        assert!(pim.set_parameter("azimuthRepeat", "100").is_err());
        assert_eq!(pim.azimuth_repeat(), 10);
        assert!(pim.set_parameter("combineTable", "2").is_err());
    }

    #[test]
    fn test_copy_and_compare() {
        let a = pim(4, 16);
        let b = pim(4, 16);
        a.update(&ret(2, 16, vec![3; 4])).unwrap();
        assert!(matches!(a.compare_with(&b), Err(PimError::Differs(_))));
        b.copy_from(&a).unwrap();
        assert_eq!(a.compare_with(&b), Ok(()));

        let c = pim(8, 16);
        assert!(matches!(c.copy_from(&a), Err(PimError::Incompatible(_))));
    }

    #[test]
    fn test_update_bytes() {
        let pim = pim(4, 16);
        let bytes = ret(2, 16, vec![5; 4]).encode();
        pim.update_bytes(&bytes).unwrap();
        assert_eq!(pim.get_return(2).unwrap().data, vec![5; 4]);
        assert!(pim.update_bytes(&bytes[..20]).is_err());
    }

    #[test]
    fn test_north_reference() {
        struct FixedNav;
        impl NavDataProvider for FixedNav {
            fn nav_sample(&self, _at: Instant) -> NavSample {
                NavSample {
                    heading: Some(90.0),
                    ..Default::default()
                }
            }
        }
        let pim = pim(2, 16);
        pim.north_reference(Some(Arc::new(FixedNav)), AziRefMode::NorthFromHeading);
        pim.update(&ret(0, 16, vec![1, 1])).unwrap();
        let stored = pim.get_return(4).unwrap();
        assert!(stored.header.pim_flags.contains(PimFlags::AZI_REF_SET));
        assert_eq!(pim.last_input_azimuth(), Some(0));
    }
}
