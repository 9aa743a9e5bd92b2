//! Multi-dimension ("mosaic") event discovery.
//!
//! A mosaic event shows up in the guide as a placeholder programme whose
//! `MosaicInfo` tag names the event. Resolving it takes two hops:
//!
//! 1. look up the mosaic event record, whose `MosaicChannelsInfo` tag lists
//!    member programme external ids
//! 2. look up each member to get the concrete programme

use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::error::Result;
use super::kaltura::{search_filter, KalturaApi};
use crate::models::{Channel, EpgEntry, MosaicChannel};

/// First number handed to mosaic channels whose host is not in the catalog
pub const MOSAIC_NUMBER_BASE: u32 = 1000;

const MOSAIC_PAGE_SIZE: u32 = 200;
const MEMBER_MARKER: &str = "ProgramExternalID=";

/// Hands out channel numbers from the reserved range, skipping catalog numbers
#[derive(Debug)]
pub struct ReservedNumbers {
    next: u32,
    taken: HashSet<u32>,
}

impl ReservedNumbers {
    pub fn new(catalog: &[Channel]) -> Self {
        Self {
            next: MOSAIC_NUMBER_BASE,
            taken: catalog.iter().map(|c| c.number).collect(),
        }
    }

    pub fn next_free(&mut self) -> u32 {
        while self.taken.contains(&self.next) {
            self.next += 1;
        }
        let number = self.next;
        self.taken.insert(number);
        self.next += 1;
        number
    }
}

/// Mosaic channel for a resolved sub-stream; hosts missing from the catalog get a reserved number
pub fn mosaic_channel(
    host_channel_id: &str,
    sub_stream: &EpgEntry,
    catalog: &[Channel],
    numbers: &mut ReservedNumbers,
) -> MosaicChannel {
    match catalog.iter().find(|c| c.id == host_channel_id) {
        Some(host) => MosaicChannel::new(host, sub_stream),
        None => {
            let host = Channel {
                id: host_channel_id.to_string(),
                number: numbers.next_free(),
                name: "MD".to_string(),
                logo: None,
                adult: false,
                valid_from: None,
                valid_to: None,
            };
            MosaicChannel::new(&host, sub_stream)
        }
    }
}

pub struct MosaicResolver<'a> {
    api: &'a KalturaApi,
    ks: &'a str,
}

impl<'a> MosaicResolver<'a> {
    pub fn new(api: &'a KalturaApi, ks: &'a str) -> Self {
        Self { api, ks }
    }

    /// Concrete sub-stream programmes behind a placeholder entry.
    /// Members that fail to resolve are logged and skipped.
    pub async fn resolve(&self, placeholder: &EpgEntry) -> Result<Vec<EpgEntry>> {
        let Some(external_id) = placeholder.mosaic_external_id.as_deref() else {
            return Ok(Vec::new());
        };

        debug!("Resolving mosaic event {} ({})", external_id, placeholder.title);

        let event_filter = search_filter(&format!(
            "(and IsMosaicEvent='1' MosaicInfo='mosaic' (or externalId='{}'))",
            external_id
        ));
        let events = self
            .api
            .list_page(self.ks, &event_filter, MOSAIC_PAGE_SIZE, 1)
            .await?
            .objects;

        let mut resolved = Vec::new();

        for event in &events {
            for info in event.tag_values("MosaicChannelsInfo") {
                let member = info
                    .split(MEMBER_MARKER)
                    .nth(1)
                    .map(str::trim)
                    .unwrap_or_default();
                if member.is_empty() {
                    continue;
                }

                let member_filter = search_filter(&format!("(or externalId='{}')", member));
                let records = match self
                    .api
                    .list_page(self.ks, &member_filter, MOSAIC_PAGE_SIZE, 1)
                    .await
                {
                    Ok(page) => page.objects,
                    Err(e) => {
                        warn!("Mosaic member {} lookup failed: {}", member, e);
                        continue;
                    }
                };

                let Some(record) = records.first() else {
                    debug!("Mosaic member {} returned no programme", member);
                    continue;
                };

                let (Some(start), Some(end)) = (
                    Utc.timestamp_opt(record.start_date, 0).single(),
                    Utc.timestamp_opt(record.end_date, 0).single(),
                ) else {
                    continue;
                };

                let mut entry = EpgEntry::new(
                    record.id.to_string(),
                    placeholder.channel_id.clone(),
                    record.name.clone(),
                    start,
                    end,
                );
                entry.description = record.description.clone();
                entry.poster = placeholder.poster.clone();

                if entry.has_valid_interval() {
                    resolved.push(entry);
                }
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kaltura::profile::O2TV_CZ;
    use crate::services::transport::testing::{ok_json, ScriptedTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn placeholder() -> EpgEntry {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_007_200, 0).unwrap();
        let mut entry = EpgEntry::new("900", "100", "Tennis", start, end);
        entry.mosaic_external_id = Some("MOSAIC-1".to_string());
        entry.poster = Some("https://poster".to_string());
        entry
    }

    #[tokio::test]
    async fn test_two_members_three_queries() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            let ksql = request.json().unwrap()["filter"]["kSql"].as_str().unwrap().to_string();
            if ksql.contains("IsMosaicEvent") {
                return ok_json(json!({ "result": { "totalCount": 1, "objects": [{
                    "id": 900,
                    "tags": { "MosaicChannelsInfo": { "objects": [
                        { "value": "Court=1,ProgramExternalID=M1" },
                        { "value": "Court=2,ProgramExternalID=M2" }
                    ] } }
                }] } }));
            }
            if ksql.contains("'M1'") {
                return ok_json(json!({ "result": { "totalCount": 1, "objects": [{
                    "id": 901, "name": "Court 1",
                    "startDate": 1_700_000_000, "endDate": 1_700_003_600
                }] } }));
            }
            ok_json(json!({ "result": { "totalCount": 0, "objects": [] } }))
        }));

        let api = KalturaApi::new(transport.clone(), &O2TV_CZ, "u", "p");
        let resolved = MosaicResolver::new(&api, "ks").resolve(&placeholder()).await.unwrap();

        assert_eq!(transport.calls().len(), 3);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "901");
        assert_eq!(resolved[0].channel_id, "100");
        assert_eq!(resolved[0].poster.as_deref(), Some("https://poster"));
    }

    #[tokio::test]
    async fn test_empty_member_is_skipped_without_query() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            ok_json(json!({ "result": { "totalCount": 1, "objects": [{
                "id": 900,
                "tags": { "MosaicChannelsInfo": { "objects": [{ "value": "ProgramExternalID=" }] } }
            }] } }))
        }));

        let api = KalturaApi::new(transport.clone(), &O2TV_CZ, "u", "p");
        let resolved = MosaicResolver::new(&api, "ks").resolve(&placeholder()).await.unwrap();
        assert!(resolved.is_empty());
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_reserved_numbers_skip_catalog() {
        let channel = |number: u32| Channel {
            id: number.to_string(),
            number,
            name: String::new(),
            logo: None,
            adult: false,
            valid_from: None,
            valid_to: None,
        };
        let mut numbers = ReservedNumbers::new(&[channel(1), channel(1000), channel(1001)]);
        assert_eq!(numbers.next_free(), 1002);
        assert_eq!(numbers.next_free(), 1003);
    }

    #[test]
    fn test_mosaic_channel_uses_host_number() {
        let host = Channel {
            id: "100".into(),
            number: 5,
            name: "Sport".into(),
            logo: None,
            adult: false,
            valid_from: None,
            valid_to: None,
        };
        let entry = placeholder();
        let mut numbers = ReservedNumbers::new(std::slice::from_ref(&host));

        let hosted = mosaic_channel("100", &entry, std::slice::from_ref(&host), &mut numbers);
        assert_eq!(hosted.number, 5);
        assert_eq!(hosted.name, "Sport - Tennis");

        let orphan = mosaic_channel("999", &entry, std::slice::from_ref(&host), &mut numbers);
        assert_eq!(orphan.number, MOSAIC_NUMBER_BASE);
        assert_eq!(orphan.host_channel_id, "999");
    }
}
