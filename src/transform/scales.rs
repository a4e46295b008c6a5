use serde::{Deserialize, Serialize};

/// Named interval sets for the arpeggiator, in semitones above the root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleName {
    #[default]
    MajorMelodic,
    MinorNatural,
    MinorHarmonic,
    MinorMelodic,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    WholeTone,
    Chromatic,
    MajorTriad,
    MinorTriad,
    DominantSeventh,
    Octaves,
}

impl ScaleName {
    pub const ALL: [ScaleName; 18] = [
        ScaleName::MajorMelodic,
        ScaleName::MinorNatural,
        ScaleName::MinorHarmonic,
        ScaleName::MinorMelodic,
        ScaleName::MajorPentatonic,
        ScaleName::MinorPentatonic,
        ScaleName::Blues,
        ScaleName::Dorian,
        ScaleName::Phrygian,
        ScaleName::Lydian,
        ScaleName::Mixolydian,
        ScaleName::Locrian,
        ScaleName::WholeTone,
        ScaleName::Chromatic,
        ScaleName::MajorTriad,
        ScaleName::MinorTriad,
        ScaleName::DominantSeventh,
        ScaleName::Octaves,
    ];

    pub fn intervals(self) -> &'static [u8] {
        match self {
            ScaleName::MajorMelodic => &[0, 2, 4, 5, 7, 9, 11, 12],
            ScaleName::MinorNatural => &[0, 2, 3, 5, 7, 8, 10, 12],
            ScaleName::MinorHarmonic => &[0, 2, 3, 5, 7, 8, 11, 12],
            ScaleName::MinorMelodic => &[0, 2, 3, 5, 7, 9, 11, 12],
            ScaleName::MajorPentatonic => &[0, 2, 4, 7, 9, 12],
            ScaleName::MinorPentatonic => &[0, 3, 5, 7, 10, 12],
            ScaleName::Blues => &[0, 3, 5, 6, 7, 10, 12],
            ScaleName::Dorian => &[0, 2, 3, 5, 7, 9, 10, 12],
            ScaleName::Phrygian => &[0, 1, 3, 5, 7, 8, 10, 12],
            ScaleName::Lydian => &[0, 2, 4, 6, 7, 9, 11, 12],
            ScaleName::Mixolydian => &[0, 2, 4, 5, 7, 9, 10, 12],
            ScaleName::Locrian => &[0, 1, 3, 5, 6, 8, 10, 12],
            ScaleName::WholeTone => &[0, 2, 4, 6, 8, 10, 12],
            ScaleName::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
            ScaleName::MajorTriad => &[0, 4, 7],
            ScaleName::MinorTriad => &[0, 3, 7],
            ScaleName::DominantSeventh => &[0, 4, 7, 10],
            ScaleName::Octaves => &[0, 12, 24],
        }
    }
}

/// A scale given by name or by explicit intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    Named(ScaleName),
    Custom(Vec<u8>),
}

impl Default for Scale {
    fn default() -> Self {
        Scale::Named(ScaleName::default())
    }
}

impl Scale {
    pub fn intervals(&self) -> &[u8] {
        match self {
            Scale::Named(name) => name.intervals(),
            Scale::Custom(intervals) => intervals,
        }
    }
}

impl From<ScaleName> for Scale {
    fn from(name: ScaleName) -> Self {
        Scale::Named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scale_starts_on_the_root_and_ascends() {
        for name in ScaleName::ALL {
            let intervals = name.intervals();
            assert_eq!(intervals[0], 0, "{name:?}");
            assert!(intervals.windows(2).all(|w| w[0] < w[1]), "{name:?}");
        }
    }
}
