// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Static per-sender event metadata. Empty values are treated the same as absent ones so they
/// never reach the wire as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    index: Option<String>,
    source: Option<String>,
    sourcetype: Option<String>,
}

impl Metadata {
    pub fn new(index: Option<&str>, source: Option<&str>, sourcetype: Option<&str>) -> Self {
        Metadata {
            index: non_empty(index),
            source: non_empty(source),
            sourcetype: non_empty(sourcetype),
        }
    }

    /// Builds metadata from `key`/`value` pairs, ignoring unknown keys.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut metadata = Metadata::default();
        for (key, value) in pairs {
            let value = non_empty(Some(value));
            match key {
                crate::constants::METADATA_INDEX => metadata.index = value,
                crate::constants::METADATA_SOURCE => metadata.source = value,
                crate::constants::METADATA_SOURCETYPE => metadata.sourcetype = value,
                _ => {}
            }
        }
        metadata
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn sourcetype(&self) -> Option<&str> {
        self.sourcetype.as_deref()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
