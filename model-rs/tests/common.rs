use chrono::{DateTime, TimeZone, Utc};
use retroweb_model::*;
use std::collections::HashMap;

// Fixed clock so serialized timestamps are stable
pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
}

// A typical news front page with landmark regions
pub fn news_page() -> PageStructure {
    PageStructure {
        element_counts: HashMap::from([
            ("div".to_string(), 120),
            ("a".to_string(), 64),
            ("p".to_string(), 30),
            ("img".to_string(), 12),
            ("nav".to_string(), 1),
        ]),
        depth_profile: vec![1, 2, 6, 40, 90, 60, 28],
        landmarks: vec![
            "header".to_string(),
            "nav".to_string(),
            "main".to_string(),
            "footer".to_string(),
        ],
        root_children: vec![],
    }
}

// A page without landmarks, described by its largest root children
pub fn legacy_page(children: usize) -> PageStructure {
    PageStructure {
        element_counts: HashMap::from([("table".to_string(), 8), ("td".to_string(), 96)]),
        depth_profile: vec![1, 4, 20, 80],
        landmarks: vec![],
        root_children: (0..children)
            .map(|i| RootChild {
                ident: format!("table#t{}", i),
                size: 100 - i as u32,
            })
            .collect(),
    }
}

pub fn news_key() -> EntryKey {
    EntryKey::new("news.example", Era::Win98, news_page().fingerprint().unwrap())
}
