use chrono::{DateTime, Utc};

use crate::{
    db_types::{Cents, CommissionRule, NewCommissionRule},
    validation::ValidationErrors,
};

pub const MAX_NOTES_LENGTH: usize = 1000;

/// Checks the field-level constraints on a commission rule.
pub fn validate_rule(rule: &NewCommissionRule) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    errors.check(
        !rule.commission_rate.is_valid_percentage(),
        "commission_rate",
        format!("must be between 0 and 100, but was {}", rule.commission_rate),
    );
    errors.check(rule.seller_id.as_ref().map_or(false, |s| s.as_str().trim().is_empty()), "seller_id", "is empty");
    errors.check(rule.category_id.as_ref().map_or(false, |c| c.as_str().trim().is_empty()), "category_id", "is empty");
    errors.check(rule.min_order_value.map_or(false, |v| v.is_negative()), "min_order_value", "must not be negative");
    errors.check(rule.max_order_value.map_or(false, |v| v.is_negative()), "max_order_value", "must not be negative");
    if let (Some(min), Some(max)) = (rule.min_order_value, rule.max_order_value) {
        errors.check(min > max, "max_order_value", format!("must not be less than min_order_value ({min})"));
    }
    if let (Some(from), Some(until)) = (rule.valid_from, rule.valid_until) {
        errors.check(from >= until, "valid_until", format!("must be after valid_from ({from})"));
    }
    errors.check(
        rule.notes.as_ref().map_or(false, |n| n.chars().count() > MAX_NOTES_LENGTH),
        "notes",
        format!("must be at most {MAX_NOTES_LENGTH} characters"),
    );
    errors.into_result(())
}

fn ranges_overlap<T: PartialOrd + Copy>(a: (Option<T>, Option<T>), b: (Option<T>, Option<T>)) -> bool {
    let a_starts_before_b_ends = match (a.0, b.1) {
        (Some(start), Some(end)) => start <= end,
        _ => true,
    };
    let b_starts_before_a_ends = match (b.0, a.1) {
        (Some(start), Some(end)) => start <= end,
        _ => true,
    };
    a_starts_before_b_ends && b_starts_before_a_ends
}

/// Returns an active rule with exactly the same scope as `candidate` whose validity window and order-value band both
/// overlap the candidate's. Such a pair would make resolution ambiguous.
///
/// `exclude_id` skips the rule being updated.
pub fn find_overlap<'a>(
    existing: &'a [CommissionRule],
    candidate: &NewCommissionRule,
    exclude_id: Option<i64>,
) -> Option<&'a CommissionRule> {
    let window: (Option<DateTime<Utc>>, Option<DateTime<Utc>>) = (candidate.valid_from, candidate.valid_until);
    let band: (Option<Cents>, Option<Cents>) = (candidate.min_order_value, candidate.max_order_value);
    existing.iter().find(|r| {
        Some(r.id) != exclude_id
            && r.is_active
            && r.seller_id == candidate.seller_id
            && r.category_id == candidate.category_id
            && ranges_overlap((r.valid_from, r.valid_until), window)
            && ranges_overlap((r.min_order_value, r.max_order_value), band)
    })
}
