//! Letter grade → grade point
//!
//! Total function: unknown or empty grades are worth 0.0, never an error.

const GRADE_TABLE: [(&str, f64); 9] = [
    ("A", 4.0),
    ("A-", 3.7),
    ("B+", 3.3),
    ("B", 3.0),
    ("B-", 2.7),
    ("C+", 2.3),
    ("C", 2.0),
    ("D", 1.0),
    ("E", 0.0),
];

/// Case-insensitive, whitespace-trimmed lookup
pub fn grade_point(letter: &str) -> f64 {
    let normalized = normalize_grade(letter);
    GRADE_TABLE
        .iter()
        .find(|(grade, _)| *grade == normalized)
        .map(|(_, point)| *point)
        .unwrap_or(0.0)
}

pub fn normalize_grade(letter: &str) -> String {
    letter.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_table() {
        assert_eq!(grade_point("A"), 4.0);
        assert_eq!(grade_point("A-"), 3.7);
        assert_eq!(grade_point("B+"), 3.3);
        assert_eq!(grade_point("B"), 3.0);
        assert_eq!(grade_point("B-"), 2.7);
        assert_eq!(grade_point("C+"), 2.3);
        assert_eq!(grade_point("C"), 2.0);
        assert_eq!(grade_point("D"), 1.0);
        assert_eq!(grade_point("E"), 0.0);
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(grade_point(" b+ "), 3.3);
        assert_eq!(grade_point("a-"), 3.7);
    }

    #[test]
    fn test_unknown_defaults_to_zero() {
        for input in ["", "   ", "F", "A+", "85", "B +", "lulus"] {
            assert_eq!(grade_point(input), 0.0, "input {:?}", input);
        }
    }
}
