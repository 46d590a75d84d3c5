// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeSet;

use tracing::warn;

use crate::error::{Error, Result};

/// Device index filter built from strings such as `"0-3,6"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpuSelector {
    /// `None` selects every device.
    indices: Option<BTreeSet<u32>>,
}

impl GpuSelector {
    pub fn all() -> Self {
        Self { indices: None }
    }

    /// Parse a selector, falling back to "all devices" when it is malformed.
    pub fn from_config(selector: &str) -> Self {
        if selector.trim().is_empty() {
            return Self::all();
        }
        match parse_index_ranges(selector) {
            Ok(indices) => Self {
                indices: Some(indices),
            },
            Err(e) => {
                warn!("Invalid GPU selector {selector:?}: {e}; monitoring all GPUs");
                Self::all()
            }
        }
    }

    pub fn is_selected(&self, index: u32) -> bool {
        match &self.indices {
            None => true,
            Some(set) => set.contains(&index),
        }
    }

    pub fn indices(&self) -> Option<&BTreeSet<u32>> {
        self.indices.as_ref()
    }
}

/// Expand `"a-b,c"` into the set of inclusive indices.
pub fn parse_index_ranges(input: &str) -> Result<BTreeSet<u32>> {
    let mut out = BTreeSet::new();
    for token in input.split(',') {
        let parts: Vec<&str> = token.split('-').map(str::trim).collect();
        match parts.as_slice() {
            [single] => {
                out.insert(parse_index(single)?);
            }
            [start, end] => {
                let start = parse_index(start)?;
                let end = parse_index(end)?;
                if start > end {
                    return Err(Error::Selector(format!("invalid range {token:?}")));
                }
                out.extend(start..=end);
            }
            _ => return Err(Error::Selector(format!("invalid range {token:?}"))),
        }
    }
    Ok(out)
}

fn parse_index(s: &str) -> Result<u32> {
    s.parse::<u32>()
        .map_err(|e| Error::Selector(format!("invalid index {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges_and_singles() {
        let set = parse_index_ranges("0-2,5, 7").unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 5, 7]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_index_ranges("3-1").is_err());
        assert!(parse_index_ranges("1-2-3").is_err());
        assert!(parse_index_ranges("x").is_err());
        assert!(parse_index_ranges("1,").is_err());
    }

    #[test]
    fn test_empty_selector_selects_all() {
        let sel = GpuSelector::from_config("");
        assert!(sel.indices().is_none());
        assert!(sel.is_selected(0));
        assert!(sel.is_selected(31));
    }

    #[test]
    fn test_invalid_selector_falls_back_to_all() {
        let sel = GpuSelector::from_config("4-2");
        assert_eq!(sel, GpuSelector::all());
    }

    #[test]
    fn test_single_index() {
        let sel = GpuSelector::from_config("1");
        assert!(sel.is_selected(1));
        assert!(!sel.is_selected(0));
    }
}
