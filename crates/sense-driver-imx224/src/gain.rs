//! Analog gain curve.
//!
//! The sensor's gain register takes a code in 0.3 dB-ish steps. Linear
//! gain requests in [16, 1023] are mapped through a 497-entry
//! monotonic curve covering gains 16..=512 (0 dB to ~30 dB); gains at
//! or above 512 saturate at the fixed ceiling code. The curve encodes
//! the sensor's physical response; replacements must stay monotonic
//! and keep the endpoints (gain 16 -> 0, gain 512 -> ceiling).

/// Smallest accepted linear gain (unity).
pub const GAIN_MIN: u16 = 16;
/// Largest accepted linear gain request.
pub const GAIN_MAX: u16 = 1023;
/// Register code written for gains at or above 512.
pub const GAIN_CODE_CEILING: u16 = 300;

/// dB-like curve for linear gains 16..=512, in thirds of the final
/// register code.
const GAIN_CURVE: [u16; 497] = [
    0, 2, 3, 5, 6, 8, 9, 11, 12, 13, 14, 15, 16, 17, 18, 19,
    20, 21, 22, 23, 23, 24, 25, 26, 27, 27, 28, 29, 29, 30, 31, 31,
    32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 38, 38, 39, 39, 40,
    40, 41, 41, 41, 42, 42, 43, 43, 44, 44, 44, 45, 45, 45, 46, 46,
    47, 47, 47, 48, 48, 48, 49, 49, 49, 50, 50, 50, 51, 51, 51, 52,
    52, 52, 52, 53, 53, 53, 54, 54, 54, 54, 55, 55, 55, 56, 56, 56,
    56, 57, 57, 57, 57, 58, 58, 58, 58, 59, 59, 59, 59, 60, 60, 60,
    60, 60, 61, 61, 61, 61, 62, 62, 62, 62, 62, 63, 63, 63, 63, 63,
    64, 64, 64, 64, 64, 65, 65, 65, 65, 65, 66, 66, 66, 66, 66, 66,
    67, 67, 67, 67, 67, 68, 68, 68, 68, 68, 68, 69, 69, 69, 69, 69,
    69, 70, 70, 70, 70, 70, 70, 71, 71, 71, 71, 71, 71, 71, 72, 72,
    72, 72, 72, 72, 73, 73, 73, 73, 73, 73, 73, 74, 74, 74, 74, 74,
    74, 74, 75, 75, 75, 75, 75, 75, 75, 75, 76, 76, 76, 76, 76, 76,
    76, 77, 77, 77, 77, 77, 77, 77, 77, 78, 78, 78, 78, 78, 78, 78,
    78, 79, 79, 79, 79, 79, 79, 79, 79, 79, 80, 80, 80, 80, 80, 80,
    80, 80, 80, 81, 81, 81, 81, 81, 81, 81, 81, 81, 82, 82, 82, 82,
    82, 82, 82, 82, 82, 83, 83, 83, 83, 83, 83, 83, 83, 83, 83, 84,
    84, 84, 84, 84, 84, 84, 84, 84, 84, 85, 85, 85, 85, 85, 85, 85,
    85, 85, 85, 86, 86, 86, 86, 86, 86, 86, 86, 86, 86, 86, 87, 87,
    87, 87, 87, 87, 87, 87, 87, 87, 87, 88, 88, 88, 88, 88, 88, 88,
    88, 88, 88, 88, 88, 89, 89, 89, 89, 89, 89, 89, 89, 89, 89, 89,
    89, 90, 90, 90, 90, 90, 90, 90, 90, 90, 90, 90, 90, 91, 91, 91,
    91, 91, 91, 91, 91, 91, 91, 91, 91, 91, 92, 92, 92, 92, 92, 92,
    92, 92, 92, 92, 92, 92, 92, 93, 93, 93, 93, 93, 93, 93, 93, 93,
    93, 93, 93, 93, 93, 94, 94, 94, 94, 94, 94, 94, 94, 94, 94, 94,
    94, 94, 94, 95, 95, 95, 95, 95, 95, 95, 95, 95, 95, 95, 95, 95,
    95, 95, 96, 96, 96, 96, 96, 96, 96, 96, 96, 96, 96, 96, 96, 96,
    96, 97, 97, 97, 97, 97, 97, 97, 97, 97, 97, 97, 97, 97, 97, 97,
    97, 98, 98, 98, 98, 98, 98, 98, 98, 98, 98, 98, 98, 98, 98, 98,
    98, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100,
    100,
];

/// Map a linear gain request to the gain register code.
///
/// Clamps into [`GAIN_MIN`, `GAIN_MAX`]; monotonically nondecreasing
/// over the whole accepted range and bounded by [`GAIN_CODE_CEILING`].
pub fn gain_to_register(gain: u16) -> u16 {
    let gain = gain.clamp(GAIN_MIN, GAIN_MAX);
    if gain >= 512 {
        GAIN_CODE_CEILING
    } else {
        GAIN_CURVE[usize::from(gain - GAIN_MIN)] * 3
    }
}
