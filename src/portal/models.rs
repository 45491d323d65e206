use serde::{Deserialize, Serialize};

/// Consumption series for one day, month or year.
///
/// `values` holds one entry per interval of the requested period; entries are
/// `None` where the portal has no reading yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub peak_demand_times: Vec<Option<String>>,
    pub values: Vec<Option<f64>>,
}

impl ConsumptionRecord {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of all present readings.
    pub fn total(&self) -> f64 {
        self.values.iter().flatten().sum()
    }
}

/// Which array of the raw response carries the readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueField {
    MeteredValues,
    Values,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawConsumption {
    #[serde(default)]
    peak_demand_times: Option<Vec<Option<String>>>,
    #[serde(default)]
    metered_values: Option<Vec<Option<f64>>>,
    #[serde(default)]
    values: Option<Vec<Option<f64>>>,
}

/// The portal wraps a single record in a list; bare objects are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ConsumptionEnvelope {
    Many(Vec<RawConsumption>),
    One(RawConsumption),
}

impl ConsumptionEnvelope {
    pub(crate) fn into_record(self, field: ValueField) -> ConsumptionRecord {
        let raw = match self {
            ConsumptionEnvelope::Many(list) => match list.into_iter().next() {
                Some(first) => first,
                None => return ConsumptionRecord::default(),
            },
            ConsumptionEnvelope::One(raw) => raw,
        };
        let values = match field {
            ValueField::MeteredValues => raw.metered_values,
            ValueField::Values => raw.values,
        };
        ConsumptionRecord {
            peak_demand_times: raw.peak_demand_times.unwrap_or_default(),
            values: values.unwrap_or_default(),
        }
    }
}
