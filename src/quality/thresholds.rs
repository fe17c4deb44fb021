//! Per-roadset acceptance windows for the monitored spill quantities.
//!
//! Every roadset (a generation of the experiment's run configuration) has
//! its own profile. A dataset is mapped to a roadset by the `roadsetNN_` tag
//! in its schema name, or failing that by the run number of a production
//! schema (`run_NNNNNN_RXXX`). Anything unresolvable falls back to roadset 57.

use crate::quality::error::{QualityError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

pub const DEFAULT_ROADSET: &str = "57";

/// A monitored quantity with a configured acceptance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    TargetPos,
    TsGo,
    Accepted,
    AfterInh,
    AcceptedOverAfterInh,
    Nm3Ion,
    G2Sem,
    QieSum,
    Inhibit,
    Busy,
    DutyFactor,
}

impl Quantity {
    pub const ALL: [Quantity; 11] = [
        Quantity::TargetPos,
        Quantity::TsGo,
        Quantity::Accepted,
        Quantity::AfterInh,
        Quantity::AcceptedOverAfterInh,
        Quantity::Nm3Ion,
        Quantity::G2Sem,
        Quantity::QieSum,
        Quantity::Inhibit,
        Quantity::Busy,
        Quantity::DutyFactor,
    ];

    /// Name of the underlying reading or column.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::TargetPos => "targetPos",
            Quantity::TsGo => "TSGo",
            Quantity::Accepted => "AcceptedMatrix1",
            Quantity::AfterInh => "AfterInhMatrix1",
            Quantity::AcceptedOverAfterInh => "AcceptedMatrix1/AfterInhMatrix1",
            Quantity::Nm3Ion => "F:NM3ION",
            Quantity::G2Sem => "S:G2SEM",
            Quantity::QieSum => "QIESum",
            Quantity::Inhibit => "inhibit_block_sum",
            Quantity::Busy => "trigger_sum_no_inhibit",
            Quantity::DutyFactor => "dutyfactor53MHz",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive `[lo, hi]` window, matching SQL `BETWEEN`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub lo: f64,
    pub hi: f64,
}

impl Range {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// Inclusive span of spill identifiers known to be bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillRange {
    pub first: i64,
    pub last: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    pub target_pos: Range,
    pub tsgo: Range,
    pub accepted: Range,
    pub after_inh: Range,
    pub accept_ratio: Range,
    pub nm3ion: Range,
    pub g2sem: Range,
    pub qie_sum: Range,
    pub inhibit: Range,
    pub busy: Range,
    pub duty_factor: Range,
    #[serde(default)]
    pub bad_spill_ranges: Vec<SpillRange>,
}

impl ThresholdProfile {
    /// Windows used for roadsets 57 and 59.
    pub fn roadset57() -> Self {
        Self {
            target_pos: Range::new(1.0, 7.0),
            tsgo: Range::new(1e3, 8e3),
            accepted: Range::new(1e3, 8e3),
            after_inh: Range::new(1e3, 3e4),
            accept_ratio: Range::new(0.2, 0.9),
            nm3ion: Range::new(2e12, 1e13),
            g2sem: Range::new(2e12, 1e13),
            qie_sum: Range::new(4e10, 1e12),
            inhibit: Range::new(4e9, 1e11),
            busy: Range::new(4e9, 1e11),
            duty_factor: Range::new(15.0, 60.0),
            bad_spill_ranges: Vec::new(),
        }
    }

    pub fn roadset62() -> Self {
        Self {
            target_pos: Range::new(1.0, 7.0),
            tsgo: Range::new(1e2, 6e3),
            accepted: Range::new(1e2, 6e3),
            after_inh: Range::new(1e2, 1e4),
            accept_ratio: Range::new(0.2, 1.05),
            nm3ion: Range::new(2e12, 1e13),
            g2sem: Range::new(2e12, 1e13),
            qie_sum: Range::new(4e10, 1e12),
            inhibit: Range::new(4e9, 2e11),
            busy: Range::new(4e9, 1e11),
            duty_factor: Range::new(10.0, 60.0),
            bad_spill_ranges: Vec::new(),
        }
    }

    pub fn range(&self, quantity: Quantity) -> Range {
        match quantity {
            Quantity::TargetPos => self.target_pos,
            Quantity::TsGo => self.tsgo,
            Quantity::Accepted => self.accepted,
            Quantity::AfterInh => self.after_inh,
            Quantity::AcceptedOverAfterInh => self.accept_ratio,
            Quantity::Nm3Ion => self.nm3ion,
            Quantity::G2Sem => self.g2sem,
            Quantity::QieSum => self.qie_sum,
            Quantity::Inhibit => self.inhibit,
            Quantity::Busy => self.busy,
            Quantity::DutyFactor => self.duty_factor,
        }
    }

    fn validate(&self, roadset: &str) -> Result<()> {
        for quantity in Quantity::ALL {
            let range = self.range(quantity);
            if range.lo.is_nan() || range.hi.is_nan() || range.lo > range.hi {
                return Err(QualityError::Config(format!(
                    "roadset {roadset}: {quantity} window {range} is empty"
                )));
            }
        }
        if let Some(bad) = self.bad_spill_ranges.iter().find(|r| r.first > r.last) {
            return Err(QualityError::Config(format!(
                "roadset {roadset}: bad spill range {}..{} is reversed",
                bad.first, bad.last
            )));
        }
        Ok(())
    }
}

/// Why resolution fell back to the default profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "roadset")]
pub enum FallbackReason {
    NoRoadsetTag,
    UnknownRoadset(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoRoadsetTag => f.write_str("no roadset found in schema name"),
            FallbackReason::UnknownRoadset(r) => write!(f, "unknown roadset {r}"),
        }
    }
}

/// Outcome of mapping a dataset name to a profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub roadset: String,
    pub profile: ThresholdProfile,
    pub fallback: Option<FallbackReason>,
}

/// Immutable roadset → profile table.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    profiles: BTreeMap<String, ThresholdProfile>,
    default_roadset: String,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ThresholdConfig {
    /// The hand-authored profiles for roadsets 57, 59 and 62.
    pub fn builtin() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("57".to_string(), ThresholdProfile::roadset57());
        profiles.insert("59".to_string(), ThresholdProfile::roadset57());
        profiles.insert("62".to_string(), ThresholdProfile::roadset62());
        Self {
            profiles,
            default_roadset: DEFAULT_ROADSET.to_string(),
        }
    }

    pub fn new(
        profiles: BTreeMap<String, ThresholdProfile>,
        default_roadset: impl Into<String>,
    ) -> Result<Self> {
        let default_roadset = default_roadset.into();
        if !profiles.contains_key(&default_roadset) {
            return Err(QualityError::Config(format!(
                "default roadset {default_roadset} has no profile"
            )));
        }
        for (roadset, profile) in &profiles {
            profile.validate(roadset)?;
        }
        Ok(Self {
            profiles,
            default_roadset,
        })
    }

    /// Replace or add profiles, keeping the rest of the table.
    pub fn with_overrides(self, overrides: BTreeMap<String, ThresholdProfile>) -> Result<Self> {
        let mut profiles = self.profiles;
        profiles.extend(overrides);
        Self::new(profiles, self.default_roadset)
    }

    pub fn with_default_roadset(self, roadset: &str) -> Result<Self> {
        Self::new(self.profiles, roadset)
    }

    pub fn profile(&self, roadset: &str) -> Option<&ThresholdProfile> {
        self.profiles.get(roadset)
    }

    pub fn roadsets(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn default_roadset(&self) -> &str {
        &self.default_roadset
    }

    /// Pick the profile for a dataset by its `roadset<N>_` tag. Never fails:
    /// untagged names and unknown roadsets use the default profile and log a
    /// warning.
    pub fn resolve(&self, dataset: &str) -> Resolution {
        let fallback = match roadset_tag(dataset) {
            Some(roadset) if self.profiles.contains_key(&roadset) => {
                return Resolution {
                    profile: self.profiles[&roadset].clone(),
                    roadset,
                    fallback: None,
                };
            }
            Some(roadset) => FallbackReason::UnknownRoadset(roadset),
            None => FallbackReason::NoRoadsetTag,
        };

        tracing::warn!(
            dataset,
            default = %self.default_roadset,
            "{fallback}; using roadset {} spill criteria",
            self.default_roadset
        );
        Resolution {
            roadset: self.default_roadset.clone(),
            profile: self.profiles[&self.default_roadset].clone(),
            fallback: Some(fallback),
        }
    }
}

/// The digits of the first `roadset<digits>_` tag in a dataset name.
pub fn roadset_tag(dataset: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"roadset(\d+)_").expect("static regex"));
    re.captures(dataset).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive_at_both_ends() {
        let r = Range::new(1.0, 7.0);
        assert!(r.contains(1.0));
        assert!(r.contains(7.0));
        assert!(!r.contains(0.0));
        assert!(!r.contains(8.0));
    }

    #[test]
    fn roadset_tag_extracts_first_match() {
        assert_eq!(
            roadset_tag("user_analysis_roadset62_R005_V001").as_deref(),
            Some("62")
        );
        assert_eq!(roadset_tag("roadset59_a_roadset62_b").as_deref(), Some("59"));
        assert_eq!(roadset_tag("roadset62"), None);
        assert_eq!(roadset_tag("merged_R005"), None);
    }

    #[test]
    fn tagged_dataset_resolves_without_fallback() {
        let cfg = ThresholdConfig::builtin();
        let res = cfg.resolve("merged_roadset62_R005_V001");
        assert_eq!(res.roadset, "62");
        assert_eq!(res.profile, ThresholdProfile::roadset62());
        assert!(res.fallback.is_none());
    }

    #[test]
    fn roadset59_shares_roadset57_windows() {
        let cfg = ThresholdConfig::builtin();
        assert_eq!(cfg.profile("59"), cfg.profile("57"));
        let res = cfg.resolve("merged_roadset59_R005");
        assert_eq!(res.roadset, "59");
        assert!(res.fallback.is_none());
    }

    #[test]
    fn unknown_roadset_falls_back_to_default() {
        let cfg = ThresholdConfig::builtin();
        let res = cfg.resolve("roadset99_R005");
        assert_eq!(res.roadset, "57");
        assert_eq!(res.profile, ThresholdProfile::roadset57());
        assert_eq!(
            res.fallback,
            Some(FallbackReason::UnknownRoadset("99".into()))
        );
    }

    #[test]
    fn untagged_dataset_falls_back_to_default() {
        let cfg = ThresholdConfig::builtin();
        let res = cfg.resolve("scratch_dimuons");
        assert_eq!(res.roadset, "57");
        assert_eq!(res.fallback, Some(FallbackReason::NoRoadsetTag));
    }

    #[test]
    fn production_schema_without_tag_uses_default() {
        let cfg = ThresholdConfig::builtin();
        for schema in ["run_011040_R005", "run_010950_R004"] {
            let res = cfg.resolve(schema);
            assert_eq!(res.roadset, "57", "{schema}");
            assert_eq!(res.profile, ThresholdProfile::roadset57());
            assert_eq!(res.fallback, Some(FallbackReason::NoRoadsetTag));
        }
        assert_eq!(
            cfg.resolve("run_011040_R005").profile.duty_factor,
            Range::new(15.0, 60.0)
        );
    }

    #[test]
    fn new_requires_default_profile() {
        let err = ThresholdConfig::new(BTreeMap::new(), "57").unwrap_err();
        assert!(matches!(err, QualityError::Config(_)));
    }

    #[test]
    fn overrides_are_validated() {
        let mut bad = ThresholdProfile::roadset57();
        bad.duty_factor = Range::new(60.0, 15.0);
        let mut overrides = BTreeMap::new();
        overrides.insert("63".to_string(), bad);
        assert!(ThresholdConfig::builtin().with_overrides(overrides).is_err());
    }

    #[test]
    fn overrides_add_roadsets() {
        let mut custom = ThresholdProfile::roadset62();
        custom.bad_spill_ranges.push(SpillRange {
            first: 100,
            last: 200,
        });
        let mut overrides = BTreeMap::new();
        overrides.insert("67".to_string(), custom.clone());
        let cfg = ThresholdConfig::builtin().with_overrides(overrides).unwrap();
        let res = cfg.resolve("roadset67_R008");
        assert_eq!(res.profile, custom);
        assert_eq!(cfg.roadsets().collect::<Vec<_>>(), vec!["57", "59", "62", "67"]);
    }
}
