//! Academic calendar inference
//!
//! An academic year has two terms: the odd term runs August to January, the
//! even term February to July. Semester numbers start at 1 in the batch year.

use chrono::{Datelike, NaiveDate};

const ODD_TERM_START_MONTH: u32 = 8;
const ODD_TERM_END_MONTH: u32 = 1;

/// Semester a student of `batch_year` is in at (`current_year`, `current_month`).
/// `current_month` is 1-based. Never below 1.
pub fn infer_semester(batch_year: i32, current_year: i32, current_month: u32) -> u32 {
    let mut semester = 2 * (i64::from(current_year) - i64::from(batch_year));

    if current_month >= ODD_TERM_START_MONTH {
        semester += 1;
    } else if current_month == ODD_TERM_END_MONTH {
        semester -= 1;
    }

    semester.clamp(1, i64::from(u32::MAX)) as u32
}

/// Batch year and starting semester for a new student
///
/// The first two characters of the NIM encode the batch (`21…` → 2021). Falls
/// back to the current year and semester 1 when they are not digits or name a
/// future year.
pub fn infer_enrollment(nim: &str, today: NaiveDate) -> (i32, u32) {
    let current_year = today.year();

    match batch_year_from_nim(nim) {
        Some(batch_year) if batch_year <= current_year => {
            (batch_year, infer_semester(batch_year, current_year, today.month()))
        }
        _ => (current_year, 1),
    }
}

fn batch_year_from_nim(nim: &str) -> Option<i32> {
    let prefix = nim.get(..2)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse::<i32>().ok().map(|yy| 2000 + yy)
}
