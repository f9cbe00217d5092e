//! Stable ordering of listings by a single selectable criterion.

use std::cmp::Ordering;

use gigscout_core::{distance_km, Coordinate, Listing, SortCriterion};

use crate::auxiliary::AuxiliaryData;

fn deadline_soon(a: &Listing, b: &Listing) -> Ordering {
    match (a.deadline, b.deadline) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort `listings` by `criterion`; equal keys keep their input order.
pub fn sort(criterion: SortCriterion, mut listings: Vec<Listing>, aux: &AuxiliaryData) -> Vec<Listing> {
    match criterion {
        SortCriterion::Newest => listings.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortCriterion::Oldest => listings.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortCriterion::BudgetHigh => listings.sort_by(|a, b| b.budget.total_cmp(&a.budget)),
        SortCriterion::BudgetLow => listings.sort_by(|a, b| a.budget.total_cmp(&b.budget)),
        SortCriterion::DeadlineSoon => listings.sort_by(deadline_soon),
        SortCriterion::MostApplications => listings.sort_by_key(|l| {
            std::cmp::Reverse(aux.application_count(&l.id))
        }),
        SortCriterion::LeastApplications => {
            listings.sort_by_key(|l| aux.application_count(&l.id))
        }
    }
    listings
}

/// Nearest first; listings without a coordinate go last.
pub fn order_by_distance(listings: &mut [Listing], reference: Coordinate) {
    listings.sort_by(|a, b| {
        let da = a.coordinate.map(|c| distance_km(reference, c));
        let db = b.coordinate.map(|c| distance_km(reference, c));
        match (da, db) {
            (Some(da), Some(db)) => da.total_cmp(&db),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}
