//! Trend, breakdown and forecast statistics

use chrono::{TimeZone, Utc};

use crate::decode::{round_cents, DecodedRow};
use crate::models::{CostTrend, TimeWindow, TrendStat, TrendStats};
use crate::schema::BillingField;

const DAY_MILLIS: i64 = 86_400_000;

/// Shown when a value cannot be computed
pub const EMPTY: &str = "-";

/// Shown when a trend percentage cannot be computed
pub const NOT_APPLICABLE: &str = "NA";

/// Minimum observed span, in days, for a forecast to be emitted
pub const MIN_FORECAST_SPAN_DAYS: i64 = 4;

const TOTAL_COST_LABEL: &str = "Total Cost";
const IDLE_COST_LABEL: &str = "Idle Cost";
const UNALLOCATED_COST_LABEL: &str = "Unallocated Cost";
const UTILIZED_COST_LABEL: &str = "Utilized Cost";
const FORECAST_COST_LABEL: &str = "Forecasted Cost";

/// Totals of one window as returned by the trend-stats query
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowCosts {
    /// Total cost
    pub total: Option<f64>,
    /// Idle cost
    pub idle: Option<f64>,
    /// Unallocated cost
    pub unallocated: Option<f64>,
    /// Earliest start time observed, epoch millis
    pub min_start: Option<i64>,
    /// Latest start time observed, epoch millis
    pub max_start: Option<i64>,
}

impl WindowCosts {
    /// Read the totals from a decoded trend-stats row
    pub fn from_row(row: &DecodedRow) -> Self {
        Self {
            total: row.double(BillingField::Sum),
            idle: row.double(BillingField::IdleCost),
            unallocated: row.double(BillingField::UnallocatedCost),
            min_start: row.timestamp(BillingField::MinStartTime),
            max_start: row.timestamp(BillingField::MaxStartTime),
        }
    }

    /// Totals of the first row, empty without rows
    pub fn from_rows(rows: &[DecodedRow]) -> Self {
        rows.first().map(Self::from_row).unwrap_or_default()
    }

    /// Observed span; a single bucket counts as one day
    fn billing_span(&self) -> Option<i64> {
        let (min, max) = (self.min_start?, self.max_start?);
        Some(if max == min {
            DAY_MILLIS
        } else {
            max - min + DAY_MILLIS
        })
    }
}

/// Preceding window of the same length, ending just before `window` starts
pub fn previous_window(window: TimeWindow) -> Option<TimeWindow> {
    let (start, end) = (window.start?, window.end?);
    let length = end - start;
    Some(TimeWindow {
        start: Some(start - length - 1),
        end: Some(start - 1),
    })
}

fn format_date(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| EMPTY.to_string(), |t| t.format("%d %B, %Y").to_string())
}

pub(crate) fn format_cost(amount: f64) -> String {
    format!("${:.2}", round_cents(amount))
}

fn empty_stat(label: &str) -> TrendStat {
    TrendStat {
        label: label.to_string(),
        description: EMPTY.to_string(),
        value: EMPTY.to_string(),
        amount: None,
    }
}

/// Cost stat described by its share of `total`
fn share_stat(label: &str, amount: Option<f64>, total: f64) -> TrendStat {
    let Some(amount) = amount else {
        return empty_stat(label);
    };
    let description = if total == 0.0 {
        EMPTY.to_string()
    } else {
        format!("{}% of total", round_cents(100.0 * amount / total))
    };
    TrendStat {
        label: label.to_string(),
        description,
        value: format_cost(amount),
        amount: Some(amount),
    }
}

/// Builds [`TrendStats`] from current and preceding window totals
#[derive(Debug, Clone, Copy)]
pub struct TrendAssembler {
    window: TimeWindow,
    now: i64,
}

impl TrendAssembler {
    /// Assembler for the requested `window` evaluated at `now` (epoch millis)
    pub fn new(window: TimeWindow, now: i64) -> Self {
        Self { window, now }
    }

    /// Assemble every stat
    pub fn assemble(&self, current: &WindowCosts, previous: Option<&WindowCosts>) -> TrendStats {
        let total = current.total.unwrap_or(0.0);
        let utilized = match (current.total, current.idle) {
            (Some(total), Some(idle)) => {
                Some(round_cents(total - idle - current.unallocated.unwrap_or(0.0)))
            }
            _ => None,
        };

        TrendStats {
            total_cost: self.total_cost(current),
            idle_cost: share_stat(IDLE_COST_LABEL, current.idle, total),
            unallocated_cost: share_stat(UNALLOCATED_COST_LABEL, current.unallocated, total),
            utilized_cost: share_stat(UTILIZED_COST_LABEL, utilized, total),
            forecast_cost: self.forecast(current),
            cost_trend: self.cost_trend(current, previous),
        }
    }

    fn total_cost(&self, current: &WindowCosts) -> TrendStat {
        let Some(total) = current.total else {
            return empty_stat(TOTAL_COST_LABEL);
        };
        let description = match (self.window.start, self.window.end) {
            (Some(start), Some(end)) => {
                format!("of {} - {}", format_date(start), format_date(end))
            }
            _ => EMPTY.to_string(),
        };
        TrendStat {
            label: TOTAL_COST_LABEL.to_string(),
            description,
            value: format_cost(total),
            amount: Some(total),
        }
    }

    /// Total projected over the unobserved remainder of the window
    pub fn forecast_amount(&self, current: &WindowCosts) -> Option<f64> {
        let end = self.window.end?;
        if self.now > end {
            return None;
        }
        let total = current.total?;
        let max_start = current.max_start?;
        let span = current.billing_span()?;
        if span <= MIN_FORECAST_SPAN_DAYS * DAY_MILLIS {
            return None;
        }

        let remaining = (end + 1000 - max_start) as f64;
        Some(round_cents(total * round_cents(remaining / span as f64)))
    }

    fn forecast(&self, current: &WindowCosts) -> TrendStat {
        let Some(forecast) = self.forecast_amount(current) else {
            return empty_stat(FORECAST_COST_LABEL);
        };
        let description = self
            .window
            .end
            .map_or_else(|| EMPTY.to_string(), |end| format!("by {}", format_date(end)));
        TrendStat {
            label: FORECAST_COST_LABEL.to_string(),
            description,
            value: format_cost(forecast),
            amount: Some(forecast),
        }
    }

    fn cost_trend(&self, current: &WindowCosts, previous: Option<&WindowCosts>) -> CostTrend {
        let previous_cost = previous.and_then(|p| p.total);
        let delta = match (current.total, previous_cost) {
            (Some(current), Some(previous)) => Some(round_cents(current - previous)),
            _ => None,
        };

        let percentage = match (delta, previous_cost, previous) {
            (Some(delta), Some(previous_cost), Some(previous))
                if previous_cost != 0.0 && self.covers_previous_window(previous) =>
            {
                format!("{}%", round_cents(100.0 * delta / previous_cost))
            }
            _ => NOT_APPLICABLE.to_string(),
        };

        CostTrend {
            previous_cost,
            delta,
            percentage,
        }
    }

    /// Preceding data must start within a day of the preceding window
    fn covers_previous_window(&self, previous: &WindowCosts) -> bool {
        let Some(window) = previous_window(self.window) else {
            return false;
        };
        match (window.start, previous.min_start) {
            (Some(start), Some(min_start)) => min_start - start <= DAY_MILLIS,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const T0: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

    fn window(days: i64) -> TimeWindow {
        TimeWindow {
            start: Some(T0),
            end: Some(T0 + days * DAY_MILLIS - 1),
        }
    }

    fn costs(total: f64, idle: f64, unallocated: f64, days_observed: i64) -> WindowCosts {
        WindowCosts {
            total: Some(total),
            idle: Some(idle),
            unallocated: Some(unallocated),
            min_start: Some(T0),
            max_start: Some(T0 + (days_observed - 1) * DAY_MILLIS),
        }
    }

    #[test]
    fn test_breakdown_and_shares() {
        let stats = TrendAssembler::new(window(30), T0 + 40 * DAY_MILLIS)
            .assemble(&costs(200.0, 50.0, 30.0, 30), None);

        assert_eq!(stats.total_cost.value, "$200.00");
        assert_eq!(
            stats.total_cost.description,
            "of 01 January, 2024 - 30 January, 2024"
        );
        assert_eq!(stats.idle_cost.description, "25% of total");
        assert_eq!(stats.unallocated_cost.description, "15% of total");
        assert_eq!(stats.utilized_cost.amount, Some(120.0));
        assert_eq!(stats.utilized_cost.value, "$120.00");
    }

    #[test]
    fn test_zero_total_shares_are_empty() {
        let stats = TrendAssembler::new(window(10), T0).assemble(&costs(0.0, 0.0, 0.0, 1), None);
        assert_eq!(stats.idle_cost.description, EMPTY);
        assert_eq!(stats.utilized_cost.description, EMPTY);
        assert_eq!(stats.idle_cost.value, "$0.00");
    }

    #[test]
    fn test_no_data_is_empty() {
        let stats = TrendAssembler::new(window(10), T0).assemble(&WindowCosts::default(), None);
        assert_eq!(stats.total_cost, empty_stat(TOTAL_COST_LABEL));
        assert_eq!(stats.forecast_cost.value, EMPTY);
        assert_eq!(stats.cost_trend.percentage, NOT_APPLICABLE);
    }

    #[test]
    fn test_forecast_projects_remaining_window() {
        // 10 observed days of a 30 day window, evaluated mid-window
        let now = T0 + 10 * DAY_MILLIS;
        let assembler = TrendAssembler::new(window(30), now);
        let current = costs(100.0, 0.0, 0.0, 10);

        // remaining = 21 days from the last bucket, span = 10 days
        assert_eq!(assembler.forecast_amount(&current), Some(210.0));
        assert_eq!(assembler.assemble(&current, None).forecast_cost.value, "$210.00");
    }

    #[test]
    fn test_forecast_needs_more_than_four_days() {
        let assembler = TrendAssembler::new(window(30), T0 + 4 * DAY_MILLIS);
        assert_eq!(assembler.forecast_amount(&costs(100.0, 0.0, 0.0, 3)), None);
        assert_eq!(assembler.forecast_amount(&costs(100.0, 0.0, 0.0, 4)), None);
        assert!(assembler.forecast_amount(&costs(100.0, 0.0, 0.0, 5)).is_some());
    }

    #[test]
    fn test_no_forecast_for_finished_window() {
        let assembler = TrendAssembler::new(window(30), T0 + 31 * DAY_MILLIS);
        assert_eq!(assembler.forecast_amount(&costs(100.0, 0.0, 0.0, 30)), None);
    }

    #[test]
    fn test_cost_trend_percentage() {
        let assembler = TrendAssembler::new(window(10), T0 + 20 * DAY_MILLIS);
        let previous = WindowCosts {
            total: Some(80.0),
            min_start: Some(T0 - 10 * DAY_MILLIS),
            ..WindowCosts::default()
        };
        let trend = assembler.assemble(&costs(100.0, 0.0, 0.0, 10), Some(&previous)).cost_trend;

        assert_eq!(trend.previous_cost, Some(80.0));
        assert_eq!(trend.delta, Some(20.0));
        assert_eq!(trend.percentage, "25%");
    }

    #[test]
    fn test_cost_trend_partial_previous_window_is_na() {
        let assembler = TrendAssembler::new(window(10), T0 + 20 * DAY_MILLIS);
        let previous = WindowCosts {
            total: Some(80.0),
            min_start: Some(T0 - 5 * DAY_MILLIS),
            ..WindowCosts::default()
        };
        let trend = assembler.assemble(&costs(100.0, 0.0, 0.0, 10), Some(&previous)).cost_trend;
        assert_eq!(trend.delta, Some(20.0));
        assert_eq!(trend.percentage, NOT_APPLICABLE);
    }

    #[test]
    fn test_cost_trend_zero_previous_is_na() {
        let assembler = TrendAssembler::new(window(10), T0);
        let previous = WindowCosts {
            total: Some(0.0),
            min_start: Some(T0 - 10 * DAY_MILLIS),
            ..WindowCosts::default()
        };
        let trend = assembler.assemble(&costs(100.0, 0.0, 0.0, 1), Some(&previous)).cost_trend;
        assert_eq!(trend.percentage, NOT_APPLICABLE);
    }

    #[test]
    fn test_previous_window_has_equal_length() {
        let current = window(7);
        let previous = previous_window(current).unwrap();
        assert_eq!(previous.end, Some(T0 - 1));
        assert_eq!(
            previous.end.unwrap() - previous.start.unwrap(),
            current.end.unwrap() - current.start.unwrap()
        );
    }

    proptest! {
        #[test]
        fn utilized_cost_identity(
            total in 0u32..10_000_000,
            idle_share in 0u32..=100,
            unallocated_share in 0u32..=100,
        ) {
            let total = f64::from(total) / 100.0;
            let idle = round_cents(total * f64::from(idle_share) / 200.0);
            let unallocated = round_cents(total * f64::from(unallocated_share) / 200.0);
            let stats = TrendAssembler::new(window(10), T0)
                .assemble(&costs(total, idle, unallocated, 1), None);
            prop_assert_eq!(
                stats.utilized_cost.amount,
                Some(round_cents(total - idle - unallocated))
            );
        }
    }
}
