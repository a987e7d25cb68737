use atomic_float::AtomicF64;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use radarpim_core::{NavDataProvider, NavSample};

/// Latest navigation values, shared between whoever parses the ship's
/// sensors and the PIMs referencing azimuths against them. NaN marks a
/// value that is not valid.
#[derive(Debug)]
pub struct SharedNavData {
    heading: AtomicF64,
    course: AtomicF64,
    pitch: AtomicF64,
    roll: AtomicF64,
    rate_of_turn: AtomicF64,
    updated: Mutex<Option<Instant>>,
}

impl Default for SharedNavData {
    fn default() -> Self {
        SharedNavData {
            heading: AtomicF64::new(f64::NAN),
            course: AtomicF64::new(f64::NAN),
            pitch: AtomicF64::new(f64::NAN),
            roll: AtomicF64::new(f64::NAN),
            rate_of_turn: AtomicF64::new(f64::NAN),
            updated: Mutex::new(None),
        }
    }
}

fn load(value: &AtomicF64) -> Option<f64> {
    let v = value.load(Ordering::Acquire);
    if v.is_nan() { None } else { Some(v) }
}

fn store(value: &AtomicF64, v: Option<f64>) {
    value.store(v.unwrap_or(f64::NAN), Ordering::Release);
}

impl SharedNavData {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&self) {
        *self.updated.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn heading(&self) -> Option<f64> {
        load(&self.heading)
    }

    pub fn set_heading(&self, heading: Option<f64>) {
        store(&self.heading, heading.map(|h| h.rem_euclid(360.0)));
        self.touch();
    }

    pub fn course(&self) -> Option<f64> {
        load(&self.course)
    }

    pub fn set_course(&self, course: Option<f64>) {
        store(&self.course, course.map(|c| c.rem_euclid(360.0)));
        self.touch();
    }

    pub fn set_attitude(&self, pitch: Option<f64>, roll: Option<f64>) {
        store(&self.pitch, pitch);
        store(&self.roll, roll);
        self.touch();
    }

    pub fn set_rate_of_turn(&self, rate: Option<f64>) {
        store(&self.rate_of_turn, rate);
        self.touch();
    }

    /// Replace every value at once
    pub fn update(&self, sample: NavSample) {
        store(&self.heading, sample.heading.map(|h| h.rem_euclid(360.0)));
        store(&self.course, sample.course.map(|c| c.rem_euclid(360.0)));
        store(&self.pitch, sample.pitch);
        store(&self.roll, sample.roll);
        store(&self.rate_of_turn, sample.rate_of_turn);
        self.touch();
    }

    /// Time since the last update, `None` before the first
    pub fn age(&self) -> Option<Duration> {
        self.updated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed())
    }
}

impl NavDataProvider for SharedNavData {
    fn nav_sample(&self, at: Instant) -> NavSample {
        let updated = *self.updated.lock().unwrap_or_else(PoisonError::into_inner);
        NavSample {
            heading: load(&self.heading),
            course: load(&self.course),
            pitch: load(&self.pitch),
            roll: load(&self.roll),
            rate_of_turn: load(&self.rate_of_turn),
            age: updated.map(|u| at.saturating_duration_since(u)).unwrap_or_default(),
        }
    }
}
