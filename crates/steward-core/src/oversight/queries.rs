//! Derived queries over the attribute store.
//!
//! A committee decision exists for a record only when every reviewing
//! institution recorded the same approval value: approval rows are grouped
//! by `(record, value)` and kept when the group size equals the party
//! count. The sponsorship view joins that decision set with the candidate,
//! sponsor, purpose and expiration attributes of the same record.

use sea_query::{
    Alias, Asterisk, Expr, ExprTrait, Func, JoinType, Order, Query, SelectStatement,
};

use crate::eav::{project_source, AttributeData};
use crate::oversight::noticelog::NoticeLogTable;

/// Committee decisions: `(record, decision, count)` groups of `approve_*`
/// rows whose size equals `parties`.
pub(crate) fn decision_query(project_id: i64, parties: u32) -> SelectStatement {
    let p = Alias::new("p");
    Query::select()
        .from_subquery(project_source(project_id), p.clone())
        .column((p.clone(), AttributeData::Record))
        .expr_as(
            Expr::col((p.clone(), AttributeData::Value)),
            Alias::new("decision"),
        )
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .and_where(Expr::col((p.clone(), AttributeData::FieldName)).like("approve_%"))
        .group_by_col((p.clone(), AttributeData::Record))
        .group_by_col((p, AttributeData::Value))
        .and_having(Expr::expr(Func::count(Expr::col(Asterisk))).eq(parties))
        .take()
}

/// Candidate user ids: the sponsored team members (`user_id_%`), or the
/// investigator (`user_id`) in investigator mode.
pub(crate) fn candidate_query(project_id: i64, investigator: bool) -> SelectStatement {
    let p = Alias::new("p");
    let mut select = Query::select();
    select
        .from_subquery(project_source(project_id), p.clone())
        .column((p.clone(), AttributeData::Record))
        .expr_as(
            Expr::col((p.clone(), AttributeData::Value)),
            Alias::new("userid"),
        );
    if investigator {
        select.and_where(Expr::col((p, AttributeData::FieldName)).eq("user_id"));
    } else {
        select.and_where(Expr::col((p, AttributeData::FieldName)).like("user_id_%"));
    }
    select.take()
}

/// Single-valued side source: `(record, value AS label)` rows for one
/// exact field name.
fn single_field(project_id: i64, field: &str, label: &str) -> SelectStatement {
    let p = Alias::new("p");
    Query::select()
        .from_subquery(project_source(project_id), p.clone())
        .column((p.clone(), AttributeData::Record))
        .expr_as(Expr::col((p.clone(), AttributeData::Value)), Alias::new(label))
        .and_where(Expr::col((p, AttributeData::FieldName)).eq(field))
        .take()
}

/// The composite sponsorship view: decisions joined with candidate,
/// sponsor and purpose rows, and outer-joined with the optional
/// expiration row. Exposes `record, decision, what_for, candidate,
/// sponsor, dt_exp`.
pub(crate) fn composite_query(
    project_id: i64,
    parties: u32,
    investigator: bool,
) -> SelectStatement {
    let cd = Alias::new("cd");
    let who = Alias::new("who");
    let sponsor = Alias::new("sponsor");
    let wf = Alias::new("wf");
    let expire = Alias::new("expire");
    Query::select()
        .from_subquery(decision_query(project_id, parties), cd.clone())
        .join_subquery(
            JoinType::Join,
            candidate_query(project_id, investigator),
            who.clone(),
            Expr::col((who.clone(), AttributeData::Record))
                .equals((cd.clone(), AttributeData::Record)),
        )
        .join_subquery(
            JoinType::Join,
            single_field(project_id, "user_id", "userid"),
            sponsor.clone(),
            Expr::col((sponsor.clone(), AttributeData::Record))
                .equals((cd.clone(), AttributeData::Record)),
        )
        .join_subquery(
            JoinType::Join,
            single_field(project_id, "what_for", "what_for"),
            wf.clone(),
            Expr::col((wf.clone(), AttributeData::Record))
                .equals((cd.clone(), AttributeData::Record)),
        )
        .join_subquery(
            JoinType::LeftJoin,
            single_field(project_id, "date_of_expiration", "dt_exp"),
            expire.clone(),
            Expr::col((expire.clone(), AttributeData::Record))
                .equals((cd.clone(), AttributeData::Record)),
        )
        .expr_as(
            Expr::col((cd.clone(), AttributeData::Record)),
            Alias::new("record"),
        )
        .expr_as(Expr::col((cd, Alias::new("decision"))), Alias::new("decision"))
        .expr_as(Expr::col((wf, Alias::new("what_for"))), Alias::new("what_for"))
        .expr_as(Expr::col((who, Alias::new("userid"))), Alias::new("candidate"))
        .expr_as(
            Expr::col((sponsor, Alias::new("userid"))),
            Alias::new("sponsor"),
        )
        .expr_as(Expr::col((expire, Alias::new("dt_exp"))), Alias::new("dt_exp"))
        .take()
}

/// Current sponsorship rows for one user id, before the expiration
/// post-filter applied by the facade.
pub(crate) fn sponsorships_query(
    project_id: i64,
    parties: u32,
    user_id: &str,
    investigator: bool,
    yes: &str,
    sponsorship: &str,
) -> SelectStatement {
    let mw = Alias::new("mw");
    Query::select()
        .from_subquery(composite_query(project_id, parties, investigator), mw.clone())
        .columns([
            (mw.clone(), Alias::new("record")),
            (mw.clone(), Alias::new("decision")),
            (mw.clone(), Alias::new("what_for")),
            (mw.clone(), Alias::new("candidate")),
            (mw.clone(), Alias::new("sponsor")),
            (mw.clone(), Alias::new("dt_exp")),
        ])
        .and_where(Expr::col((mw.clone(), Alias::new("candidate"))).eq(user_id))
        .and_where(Expr::col((mw.clone(), Alias::new("decision"))).eq(yes))
        .and_where(Expr::col((mw.clone(), Alias::new("what_for"))).eq(sponsorship))
        .order_by((mw, Alias::new("record")), Order::Asc)
        .take()
}

/// Committee decisions, optionally restricted to those with no notice-log
/// entry (the pending set).
pub(crate) fn decisions_query(project_id: i64, parties: u32, pending: bool) -> SelectStatement {
    let cd = Alias::new("cd");
    let nl = Alias::new("nl");
    let mut select = Query::select();
    select
        .from_subquery(decision_query(project_id, parties), cd.clone())
        .column((cd.clone(), AttributeData::Record))
        .expr_as(
            Expr::col((cd.clone(), Alias::new("decision"))),
            Alias::new("decision"),
        )
        .expr_as(
            Expr::col((cd.clone(), Alias::new("count"))),
            Alias::new("count"),
        );
    if pending {
        select
            .join_as(
                JoinType::LeftJoin,
                NoticeLogTable::Table,
                nl.clone(),
                Expr::col((nl.clone(), NoticeLogTable::Record))
                    .equals((cd.clone(), AttributeData::Record)),
            )
            .and_where(Expr::col((nl, NoticeLogTable::Record)).is_null());
    }
    select.order_by((cd, AttributeData::Record), Order::Asc).take()
}
