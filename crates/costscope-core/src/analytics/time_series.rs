//! Stacked time-series assembly

use std::collections::BTreeMap;

use crate::decode::{DecodedRow, FieldValue};
use crate::models::{
    start_time_filter, BillingFilter, DataPoint, EntityRef, StackedTimeSeries, TimeSeriesBucket,
};
use crate::schema::{BillingField, DataType};

const DAY_MILLIS: i64 = 86_400_000;

/// Fields that feed a stack of their own and never the primary one
const SECONDARY_FIELDS: [BillingField; 6] = [
    BillingField::CpuIdleCost,
    BillingField::MemoryIdleCost,
    BillingField::MaxCpuUtilization,
    BillingField::AvgCpuUtilization,
    BillingField::MaxMemoryUtilization,
    BillingField::AvgMemoryUtilization,
];

/// Id and name of the key used when the series is not grouped by an entity
pub const TOTAL_KEY: &str = "Total";

type Buckets = BTreeMap<i64, Vec<DataPoint>>;

#[derive(Default)]
struct Stacks {
    data: Buckets,
    cpu_idle_cost: Buckets,
    memory_idle_cost: Buckets,
    cpu_utilization: Buckets,
    memory_utilization: Buckets,
}

impl Stacks {
    fn insert(stack: &mut Buckets, time: i64, point: DataPoint) {
        if !point.is_empty() {
            stack.entry(time).or_default().push(point);
        }
    }

    fn finish(self) -> StackedTimeSeries {
        fn series(stack: Buckets) -> Vec<TimeSeriesBucket> {
            stack
                .into_iter()
                .map(|(time, values)| TimeSeriesBucket { time, values })
                .collect()
        }
        StackedTimeSeries {
            data: series(self.data),
            cpu_idle_cost: series(self.cpu_idle_cost),
            memory_idle_cost: series(self.memory_idle_cost),
            cpu_utilization: series(self.cpu_utilization),
            memory_utilization: series(self.memory_utilization),
        }
    }
}

/// Folds decoded rows of a time-bucketed query into stacks
#[derive(Debug, Clone)]
pub struct TimeSeriesAssembler {
    primary: Option<BillingField>,
    key_field: Option<BillingField>,
    selected_keys: Option<Vec<String>>,
    fields: Vec<BillingField>,
}

impl TimeSeriesAssembler {
    /// Assembler for rows selecting `fields`, grouped by `group_by_fields`,
    /// narrowed by the inclusive id filter on the key dimension if any
    pub fn new(
        fields: &[BillingField],
        group_by_fields: &[BillingField],
        filters: &[BillingFilter],
    ) -> Self {
        let primary = fields
            .iter()
            .copied()
            .find(|f| f.data_type() == DataType::Double && !SECONDARY_FIELDS.contains(f));
        let key_field = group_by_fields
            .iter()
            .copied()
            .find(|f| *f != BillingField::TimeSeries);
        let selected_keys = key_field.and_then(|key| {
            filters.iter().find_map(|f| match f {
                BillingFilter::Id(id) if id.dimension.field() == key && id.is_inclusive() => {
                    Some(id.values.clone())
                }
                _ => None,
            })
        });
        Self {
            primary,
            key_field,
            selected_keys,
            fields: fields.to_vec(),
        }
    }

    /// Build the stacks; a start-time filter back-fills zero points before
    /// the first row
    pub fn assemble(&self, rows: &[DecodedRow], filters: &[BillingFilter]) -> StackedTimeSeries {
        let mut stacks = Stacks::default();

        if let Some(first) = rows.first() {
            if let Some(start) = start_time_filter(filters) {
                for filler in self.leading_gap(first, start.value) {
                    self.add_row(&mut stacks, &filler);
                }
            }
        }
        for row in rows {
            self.add_row(&mut stacks, row);
        }

        stacks.finish()
    }

    /// Zero rows at one-day steps from `start` up to the first bucket;
    /// starts before the epoch are not filled
    fn leading_gap(&self, first: &DecodedRow, start: i64) -> Vec<DecodedRow> {
        let Some(first_time) = first.timestamp(BillingField::TimeSeries) else {
            return Vec::new();
        };
        if start < 0 {
            return Vec::new();
        }
        let Some(gap) = first_time.checked_sub(start) else {
            return Vec::new();
        };
        let missing_days = gap.div_euclid(DAY_MILLIS);
        let key = self.key_field.and_then(|f| first.reference(f).cloned());

        (1..=missing_days)
            .rev()
            .map(|k| {
                let mut values = vec![(
                    BillingField::TimeSeries,
                    FieldValue::Timestamp(first_time - k * DAY_MILLIS),
                )];
                if let (Some(field), Some(key)) = (self.key_field, key.clone()) {
                    values.push((field, FieldValue::Reference(key)));
                }
                values.extend(
                    self.fields
                        .iter()
                        .filter(|f| f.data_type() == DataType::Double)
                        .map(|f| (*f, FieldValue::Double(0.0))),
                );
                DecodedRow::new(values)
            })
            .collect()
    }

    fn key(&self, row: &DecodedRow) -> EntityRef {
        self.key_field
            .and_then(|f| row.reference(f).cloned())
            .unwrap_or_else(|| EntityRef::new(TOTAL_KEY, TOTAL_KEY, "TOTAL"))
    }

    fn add_row(&self, stacks: &mut Stacks, row: &DecodedRow) {
        let Some(time) = row.timestamp(BillingField::TimeSeries) else {
            return;
        };
        let key = self.key(row);
        if let Some(selected) = &self.selected_keys {
            if !selected.contains(&key.id) {
                return;
            }
        }

        let point = |value, max, avg| DataPoint {
            key: key.clone(),
            value,
            max,
            avg,
        };
        let primary = self.primary.and_then(|f| row.double(f));

        Stacks::insert(&mut stacks.data, time, point(primary, None, None));
        Stacks::insert(
            &mut stacks.cpu_idle_cost,
            time,
            point(row.double(BillingField::CpuIdleCost), None, None),
        );
        Stacks::insert(
            &mut stacks.memory_idle_cost,
            time,
            point(row.double(BillingField::MemoryIdleCost), None, None),
        );
        Stacks::insert(
            &mut stacks.cpu_utilization,
            time,
            point(
                None,
                row.double(BillingField::MaxCpuUtilization),
                row.double(BillingField::AvgCpuUtilization),
            ),
        );
        Stacks::insert(
            &mut stacks.memory_utilization,
            time,
            point(
                None,
                row.double(BillingField::MaxMemoryUtilization),
                row.double(BillingField::AvgMemoryUtilization),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdDimension, IdOperator, TimeFilter};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const T0: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

    fn cluster(id: &str) -> EntityRef {
        EntityRef::new(id, id, "CLUSTER")
    }

    fn row(time: i64, cluster_id: &str, cost: Option<f64>) -> DecodedRow {
        DecodedRow::new(vec![
            (
                BillingField::Sum,
                cost.map_or(FieldValue::Null, FieldValue::Double),
            ),
            (BillingField::TimeSeries, FieldValue::Timestamp(time)),
            (
                BillingField::ClusterId,
                FieldValue::Reference(cluster(cluster_id)),
            ),
        ])
    }

    fn assembler(filters: &[BillingFilter]) -> TimeSeriesAssembler {
        TimeSeriesAssembler::new(
            &[
                BillingField::Sum,
                BillingField::TimeSeries,
                BillingField::ClusterId,
            ],
            &[BillingField::TimeSeries, BillingField::ClusterId],
            filters,
        )
    }

    #[test]
    fn test_leading_gap_is_zero_filled() {
        let filters = [BillingFilter::StartTime(TimeFilter::after(T0))];
        let rows = [row(T0 + 3 * DAY_MILLIS, "c1", Some(5.0))];

        let series = assembler(&filters).assemble(&rows, &filters);

        let times: Vec<i64> = series.data.iter().map(|b| b.time).collect();
        assert_eq!(
            times,
            vec![T0, T0 + DAY_MILLIS, T0 + 2 * DAY_MILLIS, T0 + 3 * DAY_MILLIS]
        );
        for bucket in &series.data[..3] {
            assert_eq!(bucket.values.len(), 1);
            assert_eq!(bucket.values[0].value, Some(0.0));
            assert_eq!(bucket.values[0].key, cluster("c1"));
        }
        assert_eq!(series.data[3].values[0].value, Some(5.0));
    }

    #[test]
    fn test_partial_day_gap_rounds_down() {
        let filters = [BillingFilter::StartTime(TimeFilter::after(T0 + 1))];
        let rows = [row(T0 + DAY_MILLIS, "c1", Some(1.0))];
        let series = assembler(&filters).assemble(&rows, &filters);
        assert_eq!(series.data.len(), 1);
    }

    #[rstest]
    #[case(i64::MIN)]
    #[case(-100_000_000_000_000_000)]
    #[case(-1)]
    fn test_start_before_epoch_is_not_filled(#[case] start: i64) {
        let filters = [BillingFilter::StartTime(TimeFilter::after(start))];
        let rows = [row(T0, "c1", Some(5.0))];
        let series = assembler(&filters).assemble(&rows, &filters);

        assert_eq!(series.data.len(), 1);
        assert_eq!(series.data[0].time, T0);
    }

    #[test]
    fn test_no_start_filter_no_gap_fill() {
        let rows = [row(T0 + 3 * DAY_MILLIS, "c1", Some(5.0))];
        let series = assembler(&[]).assemble(&rows, &[]);
        assert_eq!(series.data.len(), 1);
    }

    #[test]
    fn test_all_null_points_are_dropped() {
        let rows = [row(T0, "c1", None), row(T0, "c2", Some(2.0))];
        let series = assembler(&[]).assemble(&rows, &[]);

        assert_eq!(series.data.len(), 1);
        assert_eq!(series.data[0].values.len(), 1);
        assert_eq!(series.data[0].values[0].key, cluster("c2"));
        assert!(series.cpu_idle_cost.is_empty());
        assert!(series.cpu_utilization.is_empty());
    }

    #[test]
    fn test_bucket_keeps_row_order() {
        let rows = [
            row(T0, "zeta", Some(1.0)),
            row(T0, "alpha", Some(2.0)),
            row(T0 + DAY_MILLIS, "mid", Some(3.0)),
        ];
        let series = assembler(&[]).assemble(&rows, &[]);

        let keys: Vec<&str> = series.data[0]
            .values
            .iter()
            .map(|p| p.key.id.as_str())
            .collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_drill_down_limits_keys() {
        let filters = [BillingFilter::id(IdDimension::Cluster, IdOperator::In, ["c2"])];
        let rows = [row(T0, "c1", Some(1.0)), row(T0, "c2", Some(2.0))];
        let series = assembler(&filters).assemble(&rows, &filters);

        assert_eq!(series.data[0].values.len(), 1);
        assert_eq!(series.data[0].values[0].key.id, "c2");
    }

    #[test]
    fn test_utilization_and_idle_stacks() {
        let fields = [
            BillingField::Sum,
            BillingField::CpuIdleCost,
            BillingField::MaxCpuUtilization,
            BillingField::AvgCpuUtilization,
            BillingField::TimeSeries,
        ];
        let rows = [DecodedRow::new(vec![
            (BillingField::Sum, FieldValue::Double(10.0)),
            (BillingField::CpuIdleCost, FieldValue::Double(4.0)),
            (BillingField::MaxCpuUtilization, FieldValue::Double(0.9)),
            (BillingField::AvgCpuUtilization, FieldValue::Double(0.4)),
            (BillingField::TimeSeries, FieldValue::Timestamp(T0)),
        ])];
        let series = TimeSeriesAssembler::new(&fields, &[BillingField::TimeSeries], &[])
            .assemble(&rows, &[]);

        assert_eq!(series.data[0].values[0].key.id, TOTAL_KEY);
        assert_eq!(series.cpu_idle_cost[0].values[0].value, Some(4.0));
        assert_eq!(series.cpu_utilization[0].values[0].max, Some(0.9));
        assert_eq!(series.cpu_utilization[0].values[0].avg, Some(0.4));
        assert!(series.memory_utilization.is_empty());
    }
}
