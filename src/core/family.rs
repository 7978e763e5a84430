//! Family discount reconciliation.
//!
//! Siblings form an undirected graph stored as mirrored `family_links` rows.
//! Each connected component is a family; members are ranked 0, 1, 2, ... and
//! the rank decides the discount written into the member's latest contract.
//!
//! Structural changes (adding or removing a link, manual re-ordering, student
//! deletion) run in a transaction. Discount propagation does not: every rank
//! and contract write is its own statement, failures are logged and skipped,
//! and a concurrent reader can see a family halfway through.

use crate::{
    core::contract::{apply_contract_discount, latest_contract},
    core::discount::{SINGLETON_FAMILY_ORDER, discount_differs, discount_for_rank},
    core::student::get_student,
    entities::{FamilyLink, Student, family_link, student},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    Condition, PaginatorTrait, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{error, info, warn};

/// Label stored on links created without an explicit relationship type.
pub const DEFAULT_RELATIONSHIP: &str = "sibling";

/// What a discount recompute touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountReport {
    /// Every student in a multi-member family that was visited
    pub members: Vec<i64>,
    /// How many `family_order` values were rewritten
    pub ranks_updated: usize,
    /// How many contracts got a new discount
    pub contracts_updated: usize,
    /// Writes or lookups that failed and were skipped
    pub failures: usize,
}

impl DiscountReport {
    /// Total number of rows written.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.ranks_updated + self.contracts_updated
    }
}

/// Both ends of a removed link plus the family as it was before removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedLink {
    /// `student_id` of the removed row
    pub student_id: i64,
    /// `relative_id` of the removed row
    pub relative_id: i64,
    /// Family of `student_id` before the link was severed
    pub family_before: Vec<i64>,
}

/// One explicit rank assignment for [`set_family_order`].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyOrderEntry {
    /// Student to re-rank
    #[serde(alias = "student_id")]
    pub student_id: i64,
    /// New `family_order`
    #[serde(alias = "family_order")]
    pub family_order: i32,
}

/// A family member as shown on a student's card.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyMember {
    /// The member's record
    #[serde(flatten)]
    pub student: student::Model,
    /// Discount for the member's position in the family
    pub discount: f64,
    /// Whether this is the student the family was requested for
    pub is_self: bool,
    /// Link from the viewed student to this member, if any
    pub link_id: Option<i64>,
}

/// Ids of students directly linked from `student_id`.
async fn relative_ids<C>(db: &C, student_id: i64) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    FamilyLink::find()
        .select_only()
        .column(family_link::Column::RelativeId)
        .filter(family_link::Column::StudentId.eq(student_id))
        .filter(family_link::Column::DeletedAt.is_null())
        .into_tuple::<i64>()
        .all(db)
        .await
        .map_err(Into::into)
}

/// Returns every student reachable from `start_id` through family links,
/// `start_id` included, in ascending id order.
///
/// Breadth-first, one adjacency query per visited student. A student without
/// links is a family of one. Any storage error aborts the walk.
pub async fn find_full_family<C>(db: &C, start_id: i64) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let mut family = BTreeSet::from([start_id]);
    let mut to_visit = VecDeque::from([start_id]);

    while let Some(current) = to_visit.pop_front() {
        for relative_id in relative_ids(db, current).await? {
            if family.insert(relative_id) {
                to_visit.push_back(relative_id);
            }
        }
    }

    Ok(family.into_iter().collect())
}

/// Birth order: older first, unknown birth dates last, then creation time.
#[must_use]
pub fn compare_birth_order(a: &student::Model, b: &student::Model) -> Ordering {
    let by_birth = match (a.birth_date, b.birth_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_birth
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn rank_to_order(rank: usize) -> Result<i32> {
    i32::try_from(rank).map_err(|_| Error::Validation {
        message: format!("family rank {rank} out of range"),
    })
}

async fn write_family_order<C>(db: &C, student_id: i64, family_order: i32) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = Student::update_many()
        .col_expr(student::Column::FamilyOrder, Expr::value(family_order))
        .col_expr(student::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(student::Column::Id.eq(student_id))
        .filter(student::Column::DeletedAt.is_null())
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Active members of `ids`, ordered by stored rank then creation time.
async fn load_by_stored_rank<C>(db: &C, ids: &[i64]) -> Result<Vec<student::Model>>
where
    C: ConnectionTrait,
{
    Student::find()
        .filter(student::Column::Id.is_in(ids.iter().copied()))
        .filter(student::Column::DeletedAt.is_null())
        .order_by_asc(student::Column::FamilyOrder)
        .order_by_asc(student::Column::CreatedAt)
        .order_by_asc(student::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sorts `members` by birth order and persists each position as its rank.
async fn persist_birth_ranks<C>(db: &C, mut members: Vec<student::Model>) -> Result<usize>
where
    C: ConnectionTrait,
{
    members.sort_by(compare_birth_order);

    let mut written = 0;
    for (rank, member) in members.iter().enumerate() {
        let order = rank_to_order(rank)?;
        if member.family_order != order {
            write_family_order(db, member.id, order).await?;
            written += 1;
        }
    }
    Ok(written)
}

async fn upsert_link<C>(db: &C, student_id: i64, relative_id: i64, relationship: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let existing = FamilyLink::find()
        .filter(family_link::Column::StudentId.eq(student_id))
        .filter(family_link::Column::RelativeId.eq(relative_id))
        .one(db)
        .await?;

    match existing {
        Some(link) if link.deleted_at.is_none() => {}
        Some(link) => {
            let mut restored: family_link::ActiveModel = link.into();
            restored.deleted_at = Set(None);
            restored.update(db).await?;
        }
        None => {
            family_link::ActiveModel {
                student_id: Set(student_id),
                relative_id: Set(relative_id),
                relationship_type: Set(relationship.to_string()),
                created_at: Set(Utc::now()),
                deleted_at: Set(None),
                ..Default::default()
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}

/// Links two students as siblings, merging their families.
///
/// In one transaction: the two components are unioned, the union is ranked
/// by birth order, and every pair of members gets mirrored links (restoring
/// soft-deleted ones). Returns the merged family; its discounts still need a
/// recompute.
pub async fn add_family_link(
    db: &DatabaseConnection,
    student_id: i64,
    relative_id: i64,
    relationship_type: Option<String>,
) -> Result<Vec<i64>> {
    if student_id == relative_id {
        return Err(Error::SelfRelation { id: student_id });
    }

    let txn = db.begin().await?;
    get_student(&txn, student_id).await?;
    get_student(&txn, relative_id).await?;

    let mut union: BTreeSet<i64> = find_full_family(&txn, student_id).await?.into_iter().collect();
    union.extend(find_full_family(&txn, relative_id).await?);
    let family: Vec<i64> = union.into_iter().collect();

    let members = Student::find()
        .filter(student::Column::Id.is_in(family.iter().copied()))
        .filter(student::Column::DeletedAt.is_null())
        .all(&txn)
        .await?;
    persist_birth_ranks(&txn, members).await?;

    let relationship = relationship_type
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RELATIONSHIP.to_string());
    for (i, &a) in family.iter().enumerate() {
        for &b in &family[i + 1..] {
            upsert_link(&txn, a, b, &relationship).await?;
            upsert_link(&txn, b, a, &relationship).await?;
        }
    }

    txn.commit().await?;
    info!(student_id, relative_id, family = ?family, "Families merged");
    Ok(family)
}

/// Soft-deletes a link in both directions.
///
/// The link must be active and have `student_id` on one of its ends. Returns
/// the family as it was before the removal so the caller can recompute it and
/// check both ends for orphaning.
pub async fn remove_family_link(
    db: &DatabaseConnection,
    student_id: i64,
    link_id: i64,
) -> Result<RemovedLink> {
    let link = FamilyLink::find_by_id(link_id)
        .filter(family_link::Column::DeletedAt.is_null())
        .one(db)
        .await?
        .filter(|l| l.student_id == student_id || l.relative_id == student_id)
        .ok_or(Error::FamilyLinkNotFound { id: link_id })?;

    let (a, b) = (link.student_id, link.relative_id);

    let txn = db.begin().await?;
    let family_before = find_full_family(&txn, a).await?;

    FamilyLink::update_many()
        .col_expr(family_link::Column::DeletedAt, Expr::value(Utc::now()))
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(family_link::Column::StudentId.eq(a))
                        .add(family_link::Column::RelativeId.eq(b)),
                )
                .add(
                    Condition::all()
                        .add(family_link::Column::StudentId.eq(b))
                        .add(family_link::Column::RelativeId.eq(a)),
                ),
        )
        .filter(family_link::Column::DeletedAt.is_null())
        .exec(&txn)
        .await?;
    txn.commit().await?;

    info!(link_id, student_id = a, relative_id = b, "Family link removed");
    Ok(RemovedLink {
        student_id: a,
        relative_id: b,
        family_before,
    })
}

/// Applies explicit ranks in one transaction.
///
/// An unknown or deleted student aborts the whole batch, and so does a
/// sibling rank for a student without family links. Returns the ids that
/// were re-ranked.
pub async fn set_family_order(
    db: &DatabaseConnection,
    entries: &[FamilyOrderEntry],
) -> Result<Vec<i64>> {
    let txn = db.begin().await?;
    let mut updated = Vec::with_capacity(entries.len());

    for entry in entries {
        if write_family_order(&txn, entry.student_id, entry.family_order).await? == 0 {
            return Err(Error::StudentNotFound {
                id: entry.student_id,
            });
        }
        if entry.family_order != SINGLETON_FAMILY_ORDER
            && relative_ids(&txn, entry.student_id).await?.is_empty()
        {
            return Err(Error::Validation {
                message: format!("student {} has no family to be ranked in", entry.student_id),
            });
        }
        updated.push(entry.student_id);
    }

    txn.commit().await?;
    Ok(updated)
}

/// Re-ranks the family of `student_id` by birth order.
///
/// Used when a birth date changes. Singletons are left on the sentinel.
/// Returns how many ranks were rewritten.
pub async fn rerank_by_birth_date(db: &DatabaseConnection, student_id: i64) -> Result<usize> {
    let txn = db.begin().await?;
    let family = find_full_family(&txn, student_id).await?;
    if family.len() < 2 {
        return Ok(0);
    }

    let members = load_by_stored_rank(&txn, &family).await?;
    let written = persist_birth_ranks(&txn, members).await?;
    txn.commit().await?;
    Ok(written)
}

/// Brings ranks and latest-contract discounts of the seeds' families in line.
///
/// Each seed's component is resolved separately; a seed whose traversal
/// fails is logged and skipped, as is a component whose members cannot be
/// loaded. Every component with two or more members is renumbered 0..n by
/// stored rank (creation time breaks ties) and each member's latest contract
/// gets the tier discount for its rank. A student left on their own goes back
/// to the sentinel rank but keeps whatever discount its contract had.
///
/// Calling this twice with no change in between writes nothing the second
/// time.
pub async fn update_family_discounts<C>(db: &C, seeds: &[i64]) -> Result<DiscountReport>
where
    C: ConnectionTrait,
{
    let mut report = DiscountReport::default();
    let mut seen = BTreeSet::new();
    let mut families = Vec::new();

    for &seed in seeds {
        if seen.contains(&seed) {
            continue;
        }
        match find_full_family(db, seed).await {
            Ok(family) => {
                seen.extend(family.iter().copied());
                families.push(family);
            }
            Err(e) => {
                warn!(student_id = seed, error = %e, "Could not resolve family, skipping");
                report.failures += 1;
            }
        }
    }

    for family in families {
        let members = match load_by_stored_rank(db, &family).await {
            Ok(members) => members,
            Err(e) => {
                error!(student_ids = ?family, error = %e, "Could not load family members, skipping");
                report.failures += 1;
                continue;
            }
        };

        if let [lone] = members.as_slice() {
            release_lone_member(db, lone, &mut report).await;
            continue;
        }

        info!(student_ids = ?family, "Starting discount update for family");
        for (rank, member) in members.iter().enumerate() {
            report.members.push(member.id);
            reconcile_member(db, rank, member, &mut report).await;
        }
    }

    Ok(report)
}

/// Puts a student with no family back on the sentinel rank.
///
/// The contract is left alone; the student keeps whatever discount it had.
async fn release_lone_member<C>(db: &C, member: &student::Model, report: &mut DiscountReport)
where
    C: ConnectionTrait,
{
    if member.family_order == SINGLETON_FAMILY_ORDER {
        return;
    }
    match write_family_order(db, member.id, SINGLETON_FAMILY_ORDER).await {
        Ok(_) => {
            info!(student_id = member.id, "Student has no family, rank reset");
            report.ranks_updated += 1;
        }
        Err(e) => {
            error!(student_id = member.id, error = %e, "Failed to reset family order");
            report.failures += 1;
        }
    }
}

async fn reconcile_member<C>(db: &C, rank: usize, member: &student::Model, report: &mut DiscountReport)
where
    C: ConnectionTrait,
{
    match rank_to_order(rank) {
        Ok(order) if member.family_order != order => {
            match write_family_order(db, member.id, order).await {
                Ok(_) => report.ranks_updated += 1,
                Err(e) => {
                    error!(student_id = member.id, error = %e, "Failed to update family order");
                    report.failures += 1;
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            error!(student_id = member.id, error = %e, "Family rank out of range");
            report.failures += 1;
            return;
        }
    }

    let discount = discount_for_rank(rank);
    let contract = match latest_contract(db, member.id).await {
        Ok(Some(contract)) => contract,
        Ok(None) => return,
        Err(e) => {
            error!(student_id = member.id, error = %e, "Could not find contract for student");
            report.failures += 1;
            return;
        }
    };

    if !discount_differs(contract.discount_percentage, discount) {
        return;
    }

    match apply_contract_discount(db, &contract, discount).await {
        Ok(_) => {
            info!(
                student_id = member.id,
                contract_id = contract.id,
                new_discount = discount,
                "Contract discount updated"
            );
            report.contracts_updated += 1;
        }
        Err(e) => {
            error!(contract_id = contract.id, error = %e, "Failed to update contract discount");
            report.failures += 1;
        }
    }
}

/// Resets `student_id` to the singleton rank if no active link touches it.
///
/// Returns whether the student is now an orphan.
pub async fn reset_family_order_for_orphans<C>(db: &C, student_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    let remaining = FamilyLink::find()
        .filter(
            Condition::any()
                .add(family_link::Column::StudentId.eq(student_id))
                .add(family_link::Column::RelativeId.eq(student_id)),
        )
        .filter(family_link::Column::DeletedAt.is_null())
        .count(db)
        .await?;

    if remaining > 0 {
        return Ok(false);
    }

    write_family_order(db, student_id, SINGLETON_FAMILY_ORDER).await?;
    Ok(true)
}

/// Family of `student_id` ordered by stored rank, with display discounts.
///
/// The discount shown is the tier for the member's position in this list,
/// which may run ahead of the contracts while a recompute is pending.
pub async fn family_members(db: &DatabaseConnection, student_id: i64) -> Result<Vec<FamilyMember>> {
    get_student(db, student_id).await?;
    let family = find_full_family(db, student_id).await?;
    let members = load_by_stored_rank(db, &family).await?;

    let links: HashMap<i64, i64> = FamilyLink::find()
        .filter(family_link::Column::StudentId.eq(student_id))
        .filter(family_link::Column::DeletedAt.is_null())
        .all(db)
        .await?
        .into_iter()
        .map(|link| (link.relative_id, link.id))
        .collect();

    Ok(members
        .into_iter()
        .enumerate()
        .map(|(position, student)| FamilyMember {
            discount: discount_for_rank(position),
            is_self: student.id == student_id,
            link_id: links.get(&student.id).copied(),
            student,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::contract::get_contract;
    use crate::core::student::delete_student;
    use crate::entities::Contract;
    use crate::test_utils::*;

    async fn order_of(db: &DatabaseConnection, id: i64) -> i32 {
        Student::find_by_id(id).one(db).await.unwrap().unwrap().family_order
    }

    async fn link_id(db: &DatabaseConnection, from: i64, to: i64) -> i64 {
        FamilyLink::find()
            .filter(family_link::Column::StudentId.eq(from))
            .filter(family_link::Column::RelativeId.eq(to))
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_find_full_family_singleton() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", None).await?;

        assert_eq!(find_full_family(&db, a.id).await?, vec![a.id]);
        // Unknown ids are still a family of one
        assert_eq!(find_full_family(&db, 999_999).await?, vec![999_999]);

        Ok(())
    }

    #[tokio::test]
    async fn test_find_full_family_follows_chains() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", None).await?;
        let b = create_test_student(&db, "B", None).await?;
        let c = create_test_student(&db, "C", None).await?;
        let d = create_test_student(&db, "D", None).await?;

        // Raw chain a -> b -> c, bypassing the mesh that add_family_link builds
        insert_raw_link(&db, a.id, b.id).await?;
        insert_raw_link(&db, b.id, a.id).await?;
        insert_raw_link(&db, b.id, c.id).await?;
        insert_raw_link(&db, c.id, b.id).await?;

        assert_eq!(find_full_family(&db, a.id).await?, vec![a.id, b.id, c.id]);
        assert_eq!(find_full_family(&db, c.id).await?, vec![a.id, b.id, c.id]);
        assert_eq!(find_full_family(&db, d.id).await?, vec![d.id]);

        Ok(())
    }

    #[tokio::test]
    async fn test_add_family_link_rejects_self() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", None).await?;

        let result = add_family_link(&db, a.id, a.id, None).await;
        assert!(matches!(result, Err(Error::SelfRelation { id }) if id == a.id));

        Ok(())
    }

    #[tokio::test]
    async fn test_add_family_link_rejects_missing_student() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", None).await?;

        let result = add_family_link(&db, a.id, 404, None).await;
        assert!(matches!(result, Err(Error::StudentNotFound { id: 404 })));
        assert_eq!(find_full_family(&db, a.id).await?, vec![a.id]);

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_ranks_by_birth_date() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;

        assert_eq!(order_of(&db, a.id).await, 0);
        assert_eq!(order_of(&db, b.id).await, 1);
        assert_eq!(order_of(&db, c.id).await, 2);

        // Complete mesh, mirrored
        let links = FamilyLink::find()
            .filter(family_link::Column::DeletedAt.is_null())
            .count(&db)
            .await?;
        assert_eq!(links, 6);

        Ok(())
    }

    #[tokio::test]
    async fn test_merge_puts_missing_birth_dates_last() -> Result<()> {
        let db = setup_test_db().await?;
        let undated = create_test_student(&db, "Undated", None).await?;
        let young = create_test_student(&db, "Young", Some(date(2016, 5, 1))).await?;
        let old = create_test_student(&db, "Old", Some(date(2009, 5, 1))).await?;

        add_family_link(&db, undated.id, young.id, None).await?;
        add_family_link(&db, young.id, old.id, None).await?;

        assert_eq!(order_of(&db, old.id).await, 0);
        assert_eq!(order_of(&db, young.id).await, 1);
        assert_eq!(order_of(&db, undated.id).await, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_discounts_follow_ranks() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;
        let ca = create_test_contract(&db, a.id, 1_000_000.0).await?;
        let cb = create_test_contract(&db, b.id, 1_000_000.0).await?;
        let cc = create_test_contract(&db, c.id, 2_000_000.0).await?;

        let report = update_family_discounts(&db, &[a.id]).await?;
        assert_eq!(report.failures, 0);
        assert_eq!(report.members, vec![a.id, b.id, c.id]);

        let ca = get_contract(&db, ca.id).await?;
        let cb = get_contract(&db, cb.id).await?;
        let cc = get_contract(&db, cc.id).await?;
        assert_eq!(ca.discount_percentage, 0.0);
        assert_eq!(ca.discounted_amount, 1_000_000.0);
        assert_eq!(cb.discount_percentage, 5.0);
        assert_eq!(cb.discounted_amount, 950_000.0);
        assert_eq!(cc.discount_percentage, 10.0);
        assert_eq!(cc.discounted_amount, 1_800_000.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_update_family_discounts_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;
        for id in [a.id, b.id, c.id] {
            create_test_contract(&db, id, 500_000.0).await?;
        }

        let first = update_family_discounts(&db, &[c.id]).await?;
        assert!(first.writes() > 0);

        let second = update_family_discounts(&db, &[a.id, b.id, c.id]).await?;
        assert_eq!(second.writes(), 0);
        assert_eq!(second.failures, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_update_family_discounts_renumbers_gaps() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;

        set_family_order(
            &db,
            &[
                FamilyOrderEntry { student_id: a.id, family_order: 4 },
                FamilyOrderEntry { student_id: b.id, family_order: 10 },
                FamilyOrderEntry { student_id: c.id, family_order: 2 },
            ],
        )
        .await?;

        let report = update_family_discounts(&db, &[a.id]).await?;
        assert_eq!(report.ranks_updated, 3);

        let mut ranks = vec![
            order_of(&db, a.id).await,
            order_of(&db, b.id).await,
            order_of(&db, c.id).await,
        ];
        assert_eq!(ranks, vec![1, 2, 0]);
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2]);

        Ok(())
    }

    #[tokio::test]
    async fn test_latest_contract_gets_discount() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", Some(date(2010, 1, 1))).await?;
        let b = create_test_student(&db, "B", Some(date(2012, 1, 1))).await?;
        add_family_link(&db, a.id, b.id, None).await?;

        let old = create_dated_contract(&db, b.id, 100.0, date(2023, 9, 1)).await?;
        let new = create_dated_contract(&db, b.id, 200.0, date(2024, 9, 1)).await?;

        update_family_discounts(&db, &[b.id]).await?;

        assert_eq!(get_contract(&db, old.id).await?.discount_percentage, 0.0);
        let new = get_contract(&db, new.id).await?;
        assert_eq!(new.discount_percentage, 5.0);
        assert_eq!(new.discounted_amount, 190.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_singletons_are_not_touched() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", None).await?;
        let contract = create_test_contract(&db, a.id, 100.0).await?;

        let report = update_family_discounts(&db, &[a.id]).await?;
        assert_eq!(report, DiscountReport::default());
        assert_eq!(order_of(&db, a.id).await, SINGLETON_FAMILY_ORDER);
        assert_eq!(get_contract(&db, contract.id).await?, contract);

        Ok(())
    }

    #[tokio::test]
    async fn test_lone_student_returns_to_sentinel() -> Result<()> {
        let db = setup_test_db().await?;
        let lone = create_test_student(&db, "Lone", None).await?;
        let contract = create_test_contract(&db, lone.id, 1000.0).await?;
        write_family_order(&db, lone.id, 1).await?;

        let report = update_family_discounts(&db, &[lone.id]).await?;
        assert_eq!(report.ranks_updated, 1);
        assert_eq!(report.contracts_updated, 0);
        assert!(report.members.is_empty());
        assert_eq!(order_of(&db, lone.id).await, SINGLETON_FAMILY_ORDER);
        assert_eq!(get_contract(&db, contract.id).await?, contract);

        let new_contract = crate::core::contract::create_contract(
            &db,
            crate::core::contract::NewContract {
                student_id: lone.id,
                total_amount: 1000.0,
                start_date: None,
                end_date: None,
                comment: None,
            },
        )
        .await?;
        assert_eq!(new_contract.discount_percentage, 0.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_set_family_order_rejects_student_without_family() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, _, _) = three_siblings(&db).await?;
        let lone = create_test_student(&db, "Lone", None).await?;

        let result = set_family_order(
            &db,
            &[
                FamilyOrderEntry { student_id: a.id, family_order: 2 },
                FamilyOrderEntry { student_id: lone.id, family_order: 1 },
            ],
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert_eq!(order_of(&db, a.id).await, 0);
        assert_eq!(order_of(&db, lone.id).await, SINGLETON_FAMILY_ORDER);

        // The sentinel itself is always accepted
        set_family_order(
            &db,
            &[FamilyOrderEntry { student_id: lone.id, family_order: SINGLETON_FAMILY_ORDER }],
        )
        .await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_split_family_renumbers_each_part() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", Some(date(2008, 1, 1))).await?;
        let b = create_test_student(&db, "B", Some(date(2010, 1, 1))).await?;
        let c = create_test_student(&db, "C", Some(date(2012, 1, 1))).await?;
        let d = create_test_student(&db, "D", Some(date(2014, 1, 1))).await?;
        for (x, y) in [(a.id, b.id), (b.id, c.id), (c.id, d.id)] {
            insert_raw_link(&db, x, y).await?;
            insert_raw_link(&db, y, x).await?;
        }
        let contracts = [
            create_test_contract(&db, a.id, 1000.0).await?,
            create_test_contract(&db, b.id, 1000.0).await?,
            create_test_contract(&db, c.id, 1000.0).await?,
            create_test_contract(&db, d.id, 1000.0).await?,
        ];

        update_family_discounts(&db, &[a.id]).await?;
        assert_eq!(order_of(&db, d.id).await, 3);

        let removed = remove_family_link(&db, b.id, link_id(&db, b.id, c.id).await).await?;
        assert_eq!(removed.family_before, vec![a.id, b.id, c.id, d.id]);

        let report = update_family_discounts(&db, &removed.family_before).await?;
        assert_eq!(report.failures, 0);
        assert_eq!(find_full_family(&db, a.id).await?, vec![a.id, b.id]);
        assert_eq!(find_full_family(&db, d.id).await?, vec![c.id, d.id]);

        let ranks = [
            order_of(&db, a.id).await,
            order_of(&db, b.id).await,
            order_of(&db, c.id).await,
            order_of(&db, d.id).await,
        ];
        assert_eq!(ranks, [0, 1, 0, 1]);

        let mut discounts = Vec::new();
        for contract in &contracts {
            discounts.push(get_contract(&db, contract.id).await?.discount_percentage);
        }
        assert_eq!(discounts, vec![0.0, 5.0, 0.0, 5.0]);

        for id in [b.id, c.id] {
            assert!(!reset_family_order_for_orphans(&db, id).await?);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_unloadable_family_is_counted_and_skipped() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, _, _) = three_siblings(&db).await?;
        let x = create_test_student(&db, "X", Some(date(2011, 1, 1))).await?;
        let y = create_test_student(&db, "Y", Some(date(2013, 1, 1))).await?;
        add_family_link(&db, x.id, y.id, None).await?;

        // Links stay readable while every student lookup fails
        db.execute_unprepared("ALTER TABLE students RENAME TO students_moved")
            .await?;

        let report = update_family_discounts(&db, &[a.id, x.id]).await?;
        assert_eq!(report.failures, 2);
        assert_eq!(report.writes(), 0);
        assert!(report.members.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_removing_redundant_link_keeps_family() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;

        let removed = remove_family_link(&db, a.id, link_id(&db, a.id, c.id).await).await?;
        assert_eq!(removed.family_before, vec![a.id, b.id, c.id]);

        assert_eq!(find_full_family(&db, a.id).await?, vec![a.id, b.id, c.id]);
        update_family_discounts(&db, &removed.family_before).await?;
        assert!(!reset_family_order_for_orphans(&db, a.id).await?);
        assert!(!reset_family_order_for_orphans(&db, c.id).await?);

        assert_eq!(order_of(&db, a.id).await, 0);
        assert_eq!(order_of(&db, b.id).await, 1);
        assert_eq!(order_of(&db, c.id).await, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_orphan_reset_leaves_discount() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;
        let cc = create_test_contract(&db, c.id, 1000.0).await?;
        update_family_discounts(&db, &[a.id]).await?;
        assert_eq!(get_contract(&db, cc.id).await?.discount_percentage, 10.0);

        let first = remove_family_link(&db, c.id, link_id(&db, c.id, a.id).await).await?;
        update_family_discounts(&db, &first.family_before).await?;
        let second = remove_family_link(&db, c.id, link_id(&db, c.id, b.id).await).await?;
        update_family_discounts(&db, &second.family_before).await?;
        assert!(reset_family_order_for_orphans(&db, second.student_id).await?);
        assert!(!reset_family_order_for_orphans(&db, second.relative_id).await?);

        assert_eq!(find_full_family(&db, c.id).await?, vec![c.id]);
        assert_eq!(order_of(&db, c.id).await, SINGLETON_FAMILY_ORDER);
        assert_eq!(order_of(&db, a.id).await, 0);
        assert_eq!(order_of(&db, b.id).await, 1);
        // Orphan keeps its old contract discount
        assert_eq!(get_contract(&db, cc.id).await?.discount_percentage, 10.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_remove_link_requires_matching_student() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;
        let ab = link_id(&db, a.id, b.id).await;

        let result = remove_family_link(&db, c.id, ab).await;
        assert!(matches!(result, Err(Error::FamilyLinkNotFound { id }) if id == ab));

        remove_family_link(&db, b.id, ab).await?;
        let again = remove_family_link(&db, a.id, ab).await;
        assert!(matches!(again, Err(Error::FamilyLinkNotFound { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_relink_restores_soft_deleted_rows() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_student(&db, "A", Some(date(2010, 1, 1))).await?;
        let b = create_test_student(&db, "B", Some(date(2012, 1, 1))).await?;
        add_family_link(&db, a.id, b.id, None).await?;
        let ab = link_id(&db, a.id, b.id).await;

        remove_family_link(&db, a.id, ab).await?;
        assert_eq!(find_full_family(&db, a.id).await?, vec![a.id]);

        add_family_link(&db, b.id, a.id, None).await?;
        assert_eq!(link_id(&db, a.id, b.id).await, ab);
        assert_eq!(FamilyLink::find().count(&db).await?, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_set_family_order_unknown_student_rolls_back() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, _, _) = three_siblings(&db).await?;

        let result = set_family_order(
            &db,
            &[
                FamilyOrderEntry { student_id: a.id, family_order: 5 },
                FamilyOrderEntry { student_id: 12_345, family_order: 0 },
            ],
        )
        .await;
        assert!(matches!(result, Err(Error::StudentNotFound { id: 12_345 })));
        assert_eq!(order_of(&db, a.id).await, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_rerank_after_birth_date_change() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, _, c) = three_siblings(&db).await?;

        let mut input = student_input("Test", "C", Some(date(2005, 1, 1)));
        input.iin = None;
        crate::core::student::update_student(&db, c.id, input).await?;

        assert_eq!(rerank_by_birth_date(&db, c.id).await?, 3);
        assert_eq!(order_of(&db, c.id).await, 0);
        assert_eq!(order_of(&db, a.id).await, 1);

        let lone = create_test_student(&db, "Lone", None).await?;
        assert_eq!(rerank_by_birth_date(&db, lone.id).await?, 0);
        assert_eq!(order_of(&db, lone.id).await, SINGLETON_FAMILY_ORDER);

        Ok(())
    }

    #[tokio::test]
    async fn test_family_members_view() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;

        let members = family_members(&db, b.id).await?;
        let ids: Vec<_> = members.iter().map(|m| m.student.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        let discounts: Vec<_> = members.iter().map(|m| m.discount).collect();
        assert_eq!(discounts, vec![0.0, 5.0, 10.0]);

        assert!(members[1].is_self);
        assert!(members[1].link_id.is_none());
        assert_eq!(members[0].link_id, Some(link_id(&db, b.id, a.id).await));

        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_middle_child_recomputes_rest() -> Result<()> {
        let db = setup_test_db().await?;
        let (a, b, c) = three_siblings(&db).await?;
        let cc = create_test_contract(&db, c.id, 1000.0).await?;
        update_family_discounts(&db, &[a.id]).await?;

        let remaining = delete_student(&db, b.id).await?;
        update_family_discounts(&db, &remaining).await?;

        assert_eq!(order_of(&db, a.id).await, 0);
        assert_eq!(order_of(&db, c.id).await, 1);
        let cc = Contract::find_by_id(cc.id).one(&db).await?.unwrap();
        assert_eq!(cc.discount_percentage, 5.0);
        assert_eq!(cc.discounted_amount, 950.0);

        Ok(())
    }
}
