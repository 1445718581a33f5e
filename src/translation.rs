//! Bureau translation maps (BTM).
//!
//! A BTM translates bureau-native codes (method of payment, payment grid
//! symbols, ECOA responsibility codes) into the reference vocabulary so the
//! reasoning capability does not report formatting differences as
//! inconsistencies. Maps live under `<soul_dir>/BTM/`.
//!
//! Loading is fail-closed: a missing or unreadable map means "no map", which
//! produces the strict `BTM: NONE` instruction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::bureau::Bureau;

/// Max entries shown from the payment grid and ECOA maps.
const SAMPLE_LIMIT: usize = 18;

/// Instruction used when no map applies.
pub const NO_BTM_INSTRUCTION: &str = "BTM: NONE. If bureau-native codes appear, do not flag format \
differences unless the discrepancy is evidence-bound and impacts interpretation.";

const ANTI_NOISE_RULE: &str = "RULE: Do NOT flag bureau-native formatting/codes as inconsistencies \
if they are translated by BTM. Only flag CODE_MAPPING_INCONSISTENCY when a code appears that has \
NO translation AND the field is materially used.";

/// A bureau translation map as stored on disk.
///
/// Scalars are kept as raw JSON values so numeric versions and codes load
/// as well as strings. Sections keep the key order of the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BureauTranslationMap {
    /// Bureau name as written in the file.
    #[serde(default)]
    pub bureau: Option<Value>,
    /// Map version.
    #[serde(default)]
    pub version: Option<Value>,
    /// Section name -> (bureau code -> reference meaning).
    #[serde(default)]
    pub mappings: Map<String, Value>,
}

impl BureauTranslationMap {
    /// Load the newest map for `bureau` from `<soul_dir>/BTM/`.
    ///
    /// Tries `BTM_<B>_v1_1.json`, `BTM_<B>_v1_0.json`, `BTM_<B>.json` in that
    /// order. Returns `None` for `UNKNOWN`, when nothing is found, or when the
    /// first existing candidate cannot be parsed.
    pub fn load(soul_dir: &Path, bureau: Bureau) -> Option<Self> {
        if bureau == Bureau::Unknown {
            return None;
        }
        let btm_dir = soul_dir.join("BTM");
        if !btm_dir.is_dir() {
            return None;
        }

        let name = bureau.as_str();
        let candidates = [
            format!("BTM_{}_v1_1.json", name),
            format!("BTM_{}_v1_0.json", name),
            format!("BTM_{}.json", name),
        ];

        let path = candidates
            .iter()
            .map(|c| btm_dir.join(c))
            .find(|p| p.is_file())?;

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<Self>(&raw).map_err(|e| e.to_string()));

        match parsed {
            Ok(map) => {
                tracing::debug!(bureau = %bureau, path = %path.display(), "Loaded bureau translation map");
                Some(map)
            }
            Err(error) => {
                tracing::warn!(
                    bureau = %bureau,
                    path = %path.display(),
                    error = %error,
                    "Ignoring unreadable bureau translation map"
                );
                None
            }
        }
    }

    /// First named section that is a non-empty object.
    fn section(&self, names: &[&str]) -> Option<&Map<String, Value>> {
        names
            .iter()
            .filter_map(|n| self.mappings.get(*n))
            .filter_map(Value::as_object)
            .find(|m| !m.is_empty())
    }

    /// Render the map as a short prompt instruction.
    pub fn to_instruction(&self) -> String {
        let bureau = self.bureau.as_ref().map(render_scalar).unwrap_or_else(|| "UNKNOWN".to_string());
        let version = self.version.as_ref().map(render_scalar).unwrap_or_else(|| "NA".to_string());

        let mut lines = vec![format!(
            "BTM ACTIVE: {} v{}. Use these translations before judging inconsistencies.",
            bureau, version
        )];

        if let Some(mop) = self.section(&["MOP"]) {
            lines.push(format!("MOP map: {}.", render_pairs(mop, usize::MAX)));
        }
        if let Some(grid) = self.section(&["PAYMENT_HISTORY_GRID"]) {
            lines.push(format!(
                "Payment grid sample map: {}.",
                render_pairs(grid, SAMPLE_LIMIT)
            ));
        }
        if let Some(ecoa) = self.section(&["ECOA_RESPONSIBILITY", "ECOA_WHOSE"]) {
            lines.push(format!("ECOA map sample: {}.", render_pairs(ecoa, SAMPLE_LIMIT)));
        }

        lines.push(ANTI_NOISE_RULE.to_string());
        lines.join(" ")
    }
}

/// Strings render bare, everything else as JSON.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_pairs(map: &Map<String, Value>, limit: usize) -> String {
    map.iter()
        .take(limit)
        .map(|(k, v)| format!("{}->{}", k, render_scalar(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Instruction for `bureau`, falling back to [`NO_BTM_INSTRUCTION`].
pub fn instruction_for(soul_dir: Option<&Path>, bureau: Bureau) -> String {
    soul_dir
        .and_then(|dir| BureauTranslationMap::load(dir, bureau))
        .map(|map| map.to_instruction())
        .unwrap_or_else(|| NO_BTM_INSTRUCTION.to_string())
}
