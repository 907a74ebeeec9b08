//! Weighted band selection for picking which pre-written variant is shown.
//!
//! A uniform roll in `0..=100` is mapped through a fixed boundary table with
//! weights 15/25/40/15/5 for bands 1..=5.

use rand::Rng;

pub const ROLL_MIN: i32 = 0;
pub const ROLL_MAX: i32 = 100;

/// Inclusive `(low, high, band)` rows, ordered and covering `0..=100`
const BAND_TABLE: [(i32, i32, u8); 5] = [
    (0, 14, 1),
    (15, 39, 2),
    (40, 79, 3),
    (80, 94, 4),
    (95, 100, 5),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiceError {
    #[error("dice roll {0} is outside 0..=100")]
    OutOfRange(i32),

    #[error("band {0} is outside 1..=5")]
    InvalidBand(u8),
}

/// Result of a single roll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandRoll {
    pub raw_roll: u8,
    pub band: u8,
}

/// Map a roll to its band. Callers must not clamp out-of-range input.
pub fn map_roll_to_band(roll: i32) -> Result<u8, DiceError> {
    BAND_TABLE
        .iter()
        .find(|(low, high, _)| (*low..=*high).contains(&roll))
        .map(|(_, _, band)| *band)
        .ok_or(DiceError::OutOfRange(roll))
}

/// Roll with the supplied RNG
pub fn roll_band_with<R: Rng + ?Sized>(rng: &mut R) -> Result<BandRoll, DiceError> {
    let raw_roll = rng.random_range(ROLL_MIN..=ROLL_MAX);
    let band = map_roll_to_band(raw_roll)?;
    let raw_roll = u8::try_from(raw_roll).map_err(|_| DiceError::OutOfRange(raw_roll))?;
    Ok(BandRoll { raw_roll, band })
}

pub fn roll_band() -> Result<BandRoll, DiceError> {
    roll_band_with(&mut rand::rng())
}

/// Pick the variant text for a band (1-based)
pub fn select_variant(band_texts: &[String; 5], band: u8) -> Result<&str, DiceError> {
    let index = usize::from(band)
        .checked_sub(1)
        .filter(|i| *i < band_texts.len())
        .ok_or(DiceError::InvalidBand(band))?;
    Ok(&band_texts[index])
}
