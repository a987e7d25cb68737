//! Azimuth referencing
//!
//! Radar azimuths may be measured from the platform heading, from its course
//! over ground or from true north. The PIM can convert them on the way into
//! the store using navigation data:
//!
//! ```text
//!   input ref ──(+ heading | + course)──▶ north ──(- heading | - course)──▶ output ref
//! ```

use std::time::{Duration, Instant};

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::header::{PimFlags, ReturnHeader};

/// Azimuth referencing mode, named `<output>From<input>`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    FromPrimitive,
    ToPrimitive,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum AziRefMode {
    #[default]
    None = 0,
    NorthFromNorth = 1,
    NorthFromHeading = 2,
    HeadingFromNorth = 3,
    HeadingFromHeading = 4,
    /// Input reference taken from the return header flags
    NorthFromInput = 5,
    HeadingFromInput = 6,
    NorthFromCourse = 7,
    HeadingFromCourse = 8,
    CourseFromNorth = 9,
    CourseFromHeading = 10,
    CourseFromInput = 11,
    CourseFromCourse = 12,
}

/// What an azimuth is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Reference {
    North,
    Heading,
    Course,
}

impl AziRefMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(value)
    }

    /// Output reference, `None` when referencing is off
    pub fn output(self) -> Option<Reference> {
        match self {
            Self::None => None,
            Self::NorthFromNorth
            | Self::NorthFromHeading
            | Self::NorthFromInput
            | Self::NorthFromCourse => Some(Reference::North),
            Self::HeadingFromNorth
            | Self::HeadingFromHeading
            | Self::HeadingFromInput
            | Self::HeadingFromCourse => Some(Reference::Heading),
            Self::CourseFromNorth
            | Self::CourseFromHeading
            | Self::CourseFromInput
            | Self::CourseFromCourse => Some(Reference::Course),
        }
    }

    /// Fixed input reference, `None` when it comes from the header
    pub fn input(self) -> Option<Reference> {
        match self {
            Self::NorthFromNorth | Self::HeadingFromNorth | Self::CourseFromNorth => {
                Some(Reference::North)
            }
            Self::None
            | Self::NorthFromHeading
            | Self::HeadingFromHeading
            | Self::CourseFromHeading => Some(Reference::Heading),
            Self::NorthFromCourse | Self::HeadingFromCourse | Self::CourseFromCourse => {
                Some(Reference::Course)
            }
            Self::NorthFromInput | Self::HeadingFromInput | Self::CourseFromInput => None,
        }
    }
}

/// Input reference declared by a return header. Returns without a declared
/// reference are taken to be heading referenced.
pub fn header_reference(flags: PimFlags) -> Reference {
    if !flags.contains(PimFlags::AZI_REF_SET) || flags.contains(PimFlags::AZI_REF) {
        if flags.contains(PimFlags::AZI_REF_COURSE) {
            Reference::Course
        } else {
            Reference::Heading
        }
    } else {
        Reference::North
    }
}

/// PIM flag bits describing a reference
pub fn reference_flags(reference: Reference) -> PimFlags {
    match reference {
        Reference::North => PimFlags::AZI_REF_SET,
        Reference::Heading => PimFlags::AZI_REF_SET | PimFlags::AZI_REF,
        Reference::Course => PimFlags::AZI_REF_SET | PimFlags::AZI_REF | PimFlags::AZI_REF_COURSE,
    }
}

/// Navigation state at one moment, all angles in degrees. `None` means the
/// value is not currently valid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NavSample {
    pub heading: Option<f64>,
    pub course: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    /// Degrees per second, positive to starboard
    pub rate_of_turn: Option<f64>,
    /// Time between the measurement and the requested moment
    pub age: Duration,
}

/// Source of navigation data for azimuth referencing
pub trait NavDataProvider: Send + Sync {
    fn nav_sample(&self, at: Instant) -> NavSample;
}

/// Options controlling the azimuth transform
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceOptions {
    /// Prefer the heading carried in the return header
    pub use_return_heading: bool,
    /// Project heading forward by rate of turn and sample age
    pub extrapolate_heading: bool,
    /// Correct for antenna tilt using pitch and roll
    pub correct_pitch_roll: bool,
}

/// Result of referencing one azimuth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Referenced {
    /// Degrees, 0..360
    pub degrees: f64,
    /// Reference flags to merge into the stored header
    pub flags: PimFlags,
}

/// Keeps the last good heading and course so that short gaps in navigation
/// data do not make the picture jump back to raw azimuths.
#[derive(Debug, Clone, Default)]
pub struct AzimuthReferencer {
    last_heading: Option<f64>,
    last_course: Option<f64>,
}

impl AzimuthReferencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn last_heading(&self) -> Option<f64> {
        self.last_heading
    }

    fn heading(
        &mut self,
        header: &ReturnHeader,
        nav: Option<&NavSample>,
        options: &ReferenceOptions,
    ) -> Option<f64> {
        if options.use_return_heading && header.pim_flags.contains(PimFlags::HEADING_SET) {
            let heading = header.heading_degrees();
            self.last_heading = Some(heading);
            return Some(heading);
        }
        match nav.and_then(|n| n.heading.map(|h| (h, n))) {
            Some((heading, nav)) => {
                let heading = match (options.extrapolate_heading, nav.rate_of_turn) {
                    (true, Some(rot)) => heading + rot * nav.age.as_secs_f64(),
                    _ => heading,
                };
                let heading = heading.rem_euclid(360.0);
                self.last_heading = Some(heading);
                Some(heading)
            }
            None => self.last_heading,
        }
    }

    fn course(&mut self, nav: Option<&NavSample>) -> Option<f64> {
        match nav.and_then(|n| n.course) {
            Some(course) => {
                self.last_course = Some(course);
                Some(course)
            }
            None => self.last_course,
        }
    }

    /// Convert `degrees` as measured by the radar to the mode's output
    /// reference. Falls back to the raw azimuth when the navigation value
    /// needed has never been valid.
    pub fn reference(
        &mut self,
        mode: AziRefMode,
        degrees: f64,
        header: &ReturnHeader,
        nav: Option<&NavSample>,
        options: &ReferenceOptions,
    ) -> Referenced {
        let raw = Referenced {
            degrees,
            flags: PimFlags::empty(),
        };
        let Some(output) = mode.output() else {
            return raw;
        };
        let input = mode
            .input()
            .unwrap_or_else(|| header_reference(header.pim_flags));

        let mut degrees = degrees;
        if options.correct_pitch_roll {
            if let Some((pitch, roll)) = nav.and_then(|n| n.pitch.zip(n.roll)) {
                degrees = correct_pitch_roll(degrees, pitch, roll);
            }
        }

        let needs_heading = input == Reference::Heading || output == Reference::Heading;
        let needs_course = input == Reference::Course || output == Reference::Course;
        let heading = if needs_heading {
            match self.heading(header, nav, options) {
                Some(h) => h,
                None => return raw,
            }
        } else {
            0.0
        };
        let course = if needs_course {
            match self.course(nav) {
                Some(c) => c,
                None => return raw,
            }
        } else {
            0.0
        };
        let offset = |r: Reference| match r {
            Reference::North => 0.0,
            Reference::Heading => heading,
            Reference::Course => course,
        };

        let north = degrees + offset(input);
        let out = (north - offset(output)).rem_euclid(360.0);

        let mut flags = reference_flags(output) | PimFlags::AZI_CORR;
        if input != Reference::North {
            flags |= PimFlags::AZI_REF_ORIG;
        }
        Referenced {
            degrees: out,
            flags,
        }
    }
}

/// Project an antenna azimuth onto the horizontal plane
pub fn correct_pitch_roll(degrees: f64, pitch: f64, roll: f64) -> f64 {
    let (theta, p, r) = (degrees.to_radians(), pitch.to_radians(), roll.to_radians());
    let x = theta.cos() * p.cos() + theta.sin() * r.sin() * p.sin();
    let y = theta.sin() * r.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}
