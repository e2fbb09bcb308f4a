//! Admin dashboard aggregates: summary cards, the daily chat chart and the
//! top-admin ranking.
//!
//! Each aggregate is a full rescan of the backend, wrapped in a
//! [`DerivedView`] so it is recomputed on every change.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use deskline_shared::actor::AdminProfile;
use deskline_shared::constants::{CHART_DAYS, CHART_SCAN_LIMIT, CREATED_AT_FIELD, TOP_ADMINS_LIMIT};
use deskline_shared::{Collection, Filter, OrderBy, Record};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::connection::Connection;
use crate::derived::DerivedView;
use crate::error::ServiceError;
use crate::projection::{ChatRoom, ChatStatus, Projection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryCard {
    pub title: String,
    pub description: String,
}

impl SummaryCard {
    fn count(title: &str, n: u64) -> Self {
        Self {
            title: title.to_string(),
            description: n.to_string(),
        }
    }
}

/// Chat rooms, customers and pending chat rooms, in that order.
pub async fn fetch_cards(conn: &Connection) -> Result<Vec<SummaryCard>, ServiceError> {
    let chats = conn.count(Collection::Chat, &Filter::All).await?;
    let customers = conn.count(Collection::ChatUser, &Filter::All).await?;
    let pending = conn
        .count(Collection::Chat, &Filter::eq("status", ChatStatus::Pending.as_str()))
        .await?;

    Ok(vec![
        SummaryCard::count("Chats", chats),
        SummaryCard::count("Customers", customers),
        SummaryCard::count("Pending Chats", pending),
    ])
}

/// One bar of the chat chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPoint {
    /// Calendar day (UTC), `YYYY-MM-DD`.
    pub name: String,
    pub total: u64,
}

/// Group the given days and keep the most recent `CHART_DAYS`, oldest first.
pub fn chart_points(days: impl IntoIterator<Item = NaiveDate>) -> Vec<ChartPoint> {
    let mut totals: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for day in days {
        *totals.entry(day).or_default() += 1;
    }
    let mut points: Vec<ChartPoint> = totals
        .into_iter()
        .rev()
        .take(CHART_DAYS)
        .map(|(day, total)| ChartPoint {
            name: day.format("%Y-%m-%d").to_string(),
            total,
        })
        .collect();
    points.reverse();
    points
}

/// Daily totals over the most recent chat rooms.
pub async fn fetch_chart(conn: &Connection) -> Result<Vec<ChartPoint>, ServiceError> {
    let rows = conn
        .select(
            Collection::Chat,
            &Filter::All,
            Some(&OrderBy::desc(CREATED_AT_FIELD)),
            Some(CHART_SCAN_LIMIT),
        )
        .await?;

    let days = rows.iter().filter_map(|row| match ChatRoom::from_record(row) {
        Ok(room) => Some(room.created_at.date_naive()),
        Err(e) => {
            warn!(error = %e, "chat row left out of the chart");
            None
        }
    });
    Ok(chart_points(days))
}

/// An admin with activity counters. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSummary {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub emails: Vec<String>,
    /// Messages sent by the admin.
    pub message_count: u64,
    /// Chat rooms taken by the admin.
    pub chat_count: u64,
}

/// Rank admins by chat rooms taken, then messages sent; keep the top
/// `TOP_ADMINS_LIMIT`. Ties keep the admin list order.
pub fn rank_admins(
    admins: &[AdminProfile],
    chat_counts: &HashMap<String, u64>,
    message_counts: &HashMap<String, u64>,
) -> Vec<AdminSummary> {
    let mut ranked: Vec<AdminSummary> = admins
        .iter()
        .map(|admin| AdminSummary {
            id: admin.id.clone(),
            display_name: admin.display_name(),
            avatar_url: admin.image_url.clone(),
            emails: admin.email_addresses.clone(),
            message_count: message_counts.get(&admin.id).copied().unwrap_or(0),
            chat_count: chat_counts.get(&admin.id).copied().unwrap_or(0),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.chat_count
            .cmp(&a.chat_count)
            .then(b.message_count.cmp(&a.message_count))
    });
    ranked.truncate(TOP_ADMINS_LIMIT);
    ranked
}

fn tally(rows: &[Record], field: &str) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for row in rows {
        if let Some(Value::String(id)) = row.get(field) {
            *counts.entry(id.clone()).or_default() += 1;
        }
    }
    counts
}

pub async fn fetch_top_admins(
    conn: &Connection,
    admins: &[AdminProfile],
) -> Result<Vec<AdminSummary>, ServiceError> {
    let chats = conn.select(Collection::Chat, &Filter::All, None, None).await?;
    let messages = conn.select(Collection::Message, &Filter::All, None, None).await?;
    Ok(rank_admins(
        admins,
        &tally(&chats, "admin_id"),
        &tally(&messages, "sender_id"),
    ))
}

/// The three dashboard aggregates, each kept current by its own feeds.
pub struct Dashboard {
    pub cards: DerivedView<Vec<SummaryCard>>,
    pub chart: DerivedView<Vec<ChartPoint>>,
    pub top_admins: DerivedView<Vec<AdminSummary>>,
}

impl Dashboard {
    pub async fn open(conn: &Connection, admins: Vec<AdminProfile>) -> Self {
        let cards = DerivedView::open(
            "summary_cards",
            conn,
            &[Collection::Chat, Collection::ChatUser],
            |conn| async move { fetch_cards(&conn).await },
        )
        .await;

        let chart = DerivedView::open("chat_chart", conn, &[Collection::Chat], |conn| async move {
            fetch_chart(&conn).await
        })
        .await;

        let admins = Arc::new(admins);
        let top_admins = DerivedView::open(
            "top_admins",
            conn,
            &[Collection::Chat, Collection::Message],
            move |conn| {
                let admins = Arc::clone(&admins);
                async move { fetch_top_admins(&conn, &admins).await }
            },
        )
        .await;

        Self {
            cards,
            chart,
            top_admins,
        }
    }

    pub async fn close(&mut self) {
        self.cards.close().await;
        self.chart.close().await;
        self.top_admins.close().await;
    }
}
