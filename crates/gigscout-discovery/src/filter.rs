//! Client-side predicate over listings, one independent axis per criterion.

use chrono::{DateTime, Utc};
use gigscout_core::{distance_km, Coordinate, FilterCriteria, Listing, Urgency};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Evaluation-time inputs that are not part of the criteria themselves.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext {
    pub now: DateTime<Utc>,
    /// Actor position; `None` when location permission was not granted.
    pub reference: Option<Coordinate>,
}

impl FilterContext {
    pub fn new(now: DateTime<Utc>, reference: Option<Coordinate>) -> Self {
        Self { now, reference }
    }

    /// Reference coordinate when the geo-radius axis is in force.
    pub fn geo_reference(&self, criteria: &FilterCriteria) -> Option<Coordinate> {
        if criteria.nearby_only {
            self.reference
        } else {
            None
        }
    }
}

/// Whole calendar days until `deadline`, rounded up.
pub fn days_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (deadline - now).num_milliseconds() as f64;
    (millis / MILLIS_PER_DAY).ceil() as i64
}

fn passes_budget(criteria: &FilterCriteria, listing: &Listing) -> bool {
    criteria.budget_min.map_or(true, |min| listing.budget >= min)
        && criteria.budget_max.map_or(true, |max| listing.budget <= max)
}

fn passes_category(criteria: &FilterCriteria, listing: &Listing) -> bool {
    criteria
        .category
        .as_deref()
        .map_or(true, |category| listing.category == category)
}

fn passes_duration(criteria: &FilterCriteria, listing: &Listing) -> bool {
    criteria.durations.is_empty() || criteria.durations.contains(&listing.duration)
}

fn passes_urgency(urgency: Urgency, listing: &Listing, now: DateTime<Utc>) -> bool {
    let Some(limit) = urgency.day_limit() else {
        return true;
    };
    match listing.deadline {
        Some(deadline) => (0..=limit).contains(&days_until(deadline, now)),
        None => false,
    }
}

fn passes_skills(criteria: &FilterCriteria, listing: &Listing) -> bool {
    if criteria.skills.is_empty() {
        return true;
    }
    let have: Vec<String> = listing.skills.iter().map(|s| s.to_lowercase()).collect();
    criteria.skills.iter().any(|wanted| {
        let wanted = wanted.to_lowercase();
        have.iter().any(|skill| skill.contains(&wanted))
    })
}

fn passes_radius(radius_km: f64, reference: Option<Coordinate>, listing: &Listing) -> bool {
    let Some(reference) = reference else {
        return true;
    };
    listing
        .coordinate
        .is_some_and(|at| distance_km(reference, at) <= radius_km)
}

/// True when `listing` passes every active axis of `criteria`.
pub fn matches(criteria: &FilterCriteria, listing: &Listing, ctx: &FilterContext) -> bool {
    passes_category(criteria, listing)
        && passes_budget(criteria, listing)
        && passes_duration(criteria, listing)
        && criteria.work_type.accepts(listing.work_type)
        && passes_urgency(criteria.urgency, listing, ctx.now)
        && passes_skills(criteria, listing)
        && passes_radius(criteria.radius_km, ctx.geo_reference(criteria), listing)
}

/// Order-preserving filter; never adds or reorders listings.
pub fn apply(criteria: &FilterCriteria, listings: &[Listing], ctx: &FilterContext) -> Vec<Listing> {
    listings
        .iter()
        .filter(|listing| matches(criteria, listing, ctx))
        .cloned()
        .collect()
}
