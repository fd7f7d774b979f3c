//! Settings grid: expands payload expressions over axes of setting values.

use crate::job::{JobDescriptor, SettingValue, SettingsMap};

/// Cartesian expansion of a base settings map.
///
/// Axes are applied in insertion order; the first axis varies slowest.
/// An axis with no values leaves the base value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsGrid {
    kind: String,
    base: SettingsMap,
    axes: Vec<(String, Vec<SettingValue>)>,
}

impl SettingsGrid {
    pub fn new(kind: impl Into<String>, base: SettingsMap) -> Self {
        Self {
            kind: kind.into(),
            base,
            axes: Vec::new(),
        }
    }

    /// Equity/USA fast-expression defaults used by the simulation service.
    pub fn fast_expression_defaults() -> Self {
        let mut base = SettingsMap::new();
        base.insert("instrumentType".into(), "EQUITY".into());
        base.insert("region".into(), "USA".into());
        base.insert("universe".into(), "TOP3000".into());
        base.insert("delay".into(), 1i64.into());
        base.insert("decay".into(), 0i64.into());
        base.insert("neutralization".into(), "SUBINDUSTRY".into());
        base.insert("truncation".into(), 0.08.into());
        base.insert("pasteurization".into(), "ON".into());
        base.insert("unitHandling".into(), "VERIFY".into());
        base.insert("nanHandling".into(), "OFF".into());
        base.insert("language".into(), "FASTEXPR".into());
        base.insert("visualization".into(), false.into());
        Self::new("REGULAR", base)
    }

    /// Add (or replace) an axis of values for `key`.
    pub fn axis<V>(mut self, key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<SettingValue>,
    {
        let key = key.into();
        let values: Vec<SettingValue> = values.into_iter().map(Into::into).collect();
        self.axes.retain(|(k, _)| k != &key);
        self.axes.push((key, values));
        self
    }

    /// Number of settings combinations per payload.
    pub fn combinations(&self) -> usize {
        self.axes
            .iter()
            .map(|(_, values)| values.len().max(1))
            .product()
    }

    /// One descriptor per (payload, combination), payload-major.
    pub fn expand<I, P>(&self, payloads: I) -> Vec<JobDescriptor>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let combos = self.settings_combinations();
        let mut out = Vec::new();
        for payload in payloads {
            let payload: String = payload.into();
            for settings in &combos {
                out.push(JobDescriptor::new(self.kind.clone(), settings.clone(), payload.clone()));
            }
        }
        out
    }

    fn settings_combinations(&self) -> Vec<SettingsMap> {
        let mut combos = vec![self.base.clone()];
        for (key, values) in &self.axes {
            if values.is_empty() {
                continue;
            }
            combos = combos
                .into_iter()
                .flat_map(|settings| {
                    values.iter().map(move |value| {
                        let mut next = settings.clone();
                        next.insert(key.clone(), value.clone());
                        next
                    })
                })
                .collect();
        }
        combos
    }
}
