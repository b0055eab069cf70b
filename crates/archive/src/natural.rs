use std::cmp::Ordering;

/// Compare two entry names the way a person would order page files.
///
/// Digit runs compare by numeric value and letters ignore case, so `page2`
/// comes before `page10` and `Page3` before `page4`. Names that are equal
/// under that rule fall back to a case-sensitive natural comparison so the
/// result is a total order and sorting is deterministic.
pub fn compare_natural(a: &str, b: &str) -> Ordering {
    natord::compare_ignore_case(a, b).then_with(|| natord::compare(a, b))
}
