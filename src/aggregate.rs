//! Dashboard aggregation: fold the on-disk records into per-visitor
//! profiles and the overview views.
//!
//! Every builder is a full rescan of the relevant files. Nothing is cached
//! between requests, so the views are always consistent with whatever is on
//! disk at read time, at O(total record count) cost per call.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{Datelike, Timelike, Weekday};
use serde::Serialize;

use crate::model::{
    self, BrowserInfo, DeviceInfo, GeoLocation, MediaIndexEntry, MediaKind, ScreenInfo,
    VisitRecord, UNKNOWN,
};
use crate::store::TelemetryStore;

/// One visitor profile, keyed by sanitized IP.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorSummary {
    pub ip_address: String,
    pub sanitized_ip: String,
    pub visits: u64,
    pub first_seen: String,
    pub last_activity: String,
    pub location: GeoLocation,
    pub browser_info: BrowserInfo,
    pub device_info: DeviceInfo,
    pub page_visits: Vec<PageVisit>,
    pub activity: ActivityTotals,
    pub media: Vec<MediaItem>,
    pub media_count: u64,
    pub screen: Option<ScreenInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub url: String,
    pub timestamp: String,
    pub referrer: String,
}

/// Interaction counters summed over every stored snapshot for one IP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTotals {
    pub mouse_clicks: u64,
    pub keystrokes: u64,
    pub scrolls: u64,
    pub time_on_page: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub media_type: MediaKind,
    pub url: String,
    pub timestamp: String,
}

/// Builds the per-visitor profile map from the per-visitor files, the
/// activity tree, the media index, and the client-data tree. Pure read; two
/// calls without intervening writes yield identical output.
pub async fn build_visitor_summaries(store: &TelemetryStore) -> BTreeMap<String, VisitorSummary> {
    let mut users: BTreeMap<String, VisitorSummary> = BTreeMap::new();

    // One file per observed request; count them, track the timestamp span,
    // keep the newest record's profile fields.
    for (sanitized_ip, record) in store.read_visit_files().await {
        let entry = users
            .entry(sanitized_ip.clone())
            .or_insert_with(|| VisitorSummary::from_first(&sanitized_ip, &record));
        entry.fold_visit(&record);
    }

    // Interaction counters, summed per IP bucket. Buckets with no visit
    // record are skipped, same as the profile views expect.
    for (sanitized_ip, snapshot) in store.read_activity_files().await {
        if let Some(user) = users.get_mut(&sanitized_ip) {
            user.activity.mouse_clicks += snapshot.activity.mouse.clicks;
            user.activity.keystrokes += snapshot.activity.keyboard.keystrokes;
            user.activity.scrolls += snapshot.activity.scroll.count;
            user.activity.time_on_page += snapshot.activity.time_on_page;
        }
    }

    // Stored media, grouped by sanitized IP.
    for entry in store.read_media_index().await {
        if let Some(user) = users.get_mut(&entry.sanitized_ip) {
            user.media.push(MediaItem {
                media_type: entry.media_type,
                url: media_url(&entry),
                timestamp: entry.capture_time.clone(),
            });
            user.media_count += 1;
        }
    }

    // Newest reported screen size, where a client beacon carried one.
    for (sanitized_ip, screen) in store.read_client_screens().await {
        if let Some(user) = users.get_mut(&sanitized_ip) {
            user.screen = Some(screen);
        }
    }

    users
}

impl VisitorSummary {
    fn from_first(sanitized_ip: &str, record: &VisitRecord) -> Self {
        Self {
            ip_address: reported_ip(sanitized_ip, record),
            sanitized_ip: sanitized_ip.to_string(),
            visits: 0,
            first_seen: record.timestamp.clone(),
            last_activity: record.timestamp.clone(),
            location: record.location.clone(),
            browser_info: record.browser_info.clone(),
            device_info: record.device_info.clone(),
            page_visits: Vec::new(),
            activity: ActivityTotals::default(),
            media: Vec::new(),
            media_count: 0,
            screen: None,
        }
    }

    fn fold_visit(&mut self, record: &VisitRecord) {
        self.visits += 1;

        if is_before(&record.timestamp, &self.first_seen) {
            self.first_seen = record.timestamp.clone();
        }
        // The newest record wins the profile fields.
        if !is_before(&record.timestamp, &self.last_activity) {
            self.last_activity = record.timestamp.clone();
            self.location = record.location.clone();
            self.browser_info = record.browser_info.clone();
            self.device_info = record.device_info.clone();
            self.ip_address = reported_ip(&self.sanitized_ip, record);
        }

        if !record.request_info.url.is_empty() {
            self.page_visits.push(PageVisit {
                url: record.request_info.url.clone(),
                timestamp: record.timestamp.clone(),
                referrer: record.request_info.referrer.clone(),
            });
        }
    }
}

fn reported_ip(sanitized_ip: &str, record: &VisitRecord) -> String {
    if record.network_info.ip_address == UNKNOWN {
        model::desanitize_ip(sanitized_ip)
    } else {
        record.network_info.ip_address.clone()
    }
}

/// Timestamp ordering, parsed when possible. The stored strings are
/// fixed-width UTC, so the string fallback agrees with the parsed path.
fn is_before(a: &str, b: &str) -> bool {
    match (model::parse_iso(a), model::parse_iso(b)) {
        (Some(x), Some(y)) => x < y,
        _ => a < b,
    }
}

fn media_url(entry: &MediaIndexEntry) -> String {
    format!(
        "/adminofthisapp/media/view/{}/{}/{}/{}",
        entry.date_folder,
        entry.sanitized_ip,
        entry.media_type.as_str(),
        entry.file_name
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOverview {
    pub recent_activity: Vec<RecentActivity>,
    pub top_users: Vec<TopUser>,
    pub stats: ActivityStats,
    pub activity_by_hour: Vec<u64>,
    pub activity_by_day: Vec<DayActivity>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub ip: String,
    pub sanitized_ip: String,
    pub title: String,
    pub description: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUser {
    pub ip: String,
    pub sanitized_ip: String,
    pub clicks: u64,
    pub keystrokes: u64,
    pub last_active: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub total_clicks: u64,
    pub total_keystrokes: u64,
    pub total_scrolls: u64,
    pub total_visits: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayActivity {
    pub day: &'static str,
    pub count: u64,
}

/// Sitewide activity view: totals, the ten most active visitors by combined
/// click and keystroke count, the newest page visits, and hour-of-day /
/// day-of-week histograms (UTC).
pub async fn activity_overview(store: &TelemetryStore) -> ActivityOverview {
    let users = build_visitor_summaries(store).await;

    let mut stats = ActivityStats::default();
    let mut top_users = Vec::new();
    let mut recent = Vec::new();
    let mut by_hour = [0u64; 24];
    let mut by_day = [0u64; 7];

    for (sanitized_ip, user) in &users {
        stats.total_clicks += user.activity.mouse_clicks;
        stats.total_keystrokes += user.activity.keystrokes;
        stats.total_scrolls += user.activity.scrolls;
        stats.total_visits += user.visits;

        if user.activity.mouse_clicks + user.activity.keystrokes > 0 {
            top_users.push(TopUser {
                ip: user.ip_address.clone(),
                sanitized_ip: sanitized_ip.clone(),
                clicks: user.activity.mouse_clicks,
                keystrokes: user.activity.keystrokes,
                last_active: user.last_activity.clone(),
            });
        }

        // Up to three newest page visits per visitor feed the timeline.
        for visit in user.page_visits.iter().rev().take(3) {
            recent.push(RecentActivity {
                ip: user.ip_address.clone(),
                sanitized_ip: sanitized_ip.clone(),
                title: "Page visit".to_string(),
                description: visit.url.clone(),
                timestamp: visit.timestamp.clone(),
            });
        }

        for visit in &user.page_visits {
            if let Some(when) = model::parse_iso(&visit.timestamp) {
                by_hour[when.hour() as usize] += 1;
                by_day[day_index(when.weekday())] += 1;
            }
        }
    }

    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    top_users.sort_by_key(|user| Reverse(user.clicks + user.keystrokes));
    top_users.truncate(10);

    ActivityOverview {
        recent_activity: recent,
        top_users,
        stats,
        activity_by_hour: by_hour.to_vec(),
        activity_by_day: DAY_NAMES
            .into_iter()
            .zip(by_day)
            .map(|(day, count)| DayActivity { day, count })
            .collect(),
    }
}

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

fn day_index(weekday: Weekday) -> usize {
    weekday.num_days_from_monday() as usize
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaGallery {
    pub images: Vec<GalleryItem>,
    pub videos: Vec<GalleryItem>,
    pub stats: MediaStats,
    pub recent: Vec<RecentMedia>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub url: String,
    pub timestamp: String,
    pub ip: String,
    pub sanitized_ip: String,
    pub file_name: String,
    pub date_folder: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMedia {
    #[serde(rename = "type")]
    pub media_type: MediaKind,
    #[serde(flatten)]
    pub item: GalleryItem,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStats {
    pub total_images: u64,
    pub total_videos: u64,
    pub media_by_user: Vec<UserMediaCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMediaCount {
    pub ip: String,
    pub sanitized_ip: String,
    pub images: u64,
    pub videos: u64,
    pub total: u64,
}

/// Gallery view over the media index: per-kind lists, per-user counts, and
/// the twenty newest captures.
pub async fn media_gallery(store: &TelemetryStore) -> MediaGallery {
    let mut gallery = MediaGallery::default();
    let mut by_user: BTreeMap<String, UserMediaCount> = BTreeMap::new();

    for entry in store.read_media_index().await {
        let item = GalleryItem {
            url: media_url(&entry),
            timestamp: entry.capture_time.clone(),
            ip: entry.ip_address.clone(),
            sanitized_ip: entry.sanitized_ip.clone(),
            file_name: entry.file_name.clone(),
            date_folder: entry.date_folder.clone(),
        };

        match entry.media_type {
            MediaKind::Image => {
                gallery.images.push(item.clone());
                gallery.stats.total_images += 1;
            }
            MediaKind::Video => {
                gallery.videos.push(item.clone());
                gallery.stats.total_videos += 1;
            }
        }
        gallery.recent.push(RecentMedia {
            media_type: entry.media_type,
            item,
        });

        let row = by_user
            .entry(entry.ip_address.clone())
            .or_insert_with(|| UserMediaCount {
                ip: entry.ip_address.clone(),
                sanitized_ip: entry.sanitized_ip.clone(),
                images: 0,
                videos: 0,
                total: 0,
            });
        match entry.media_type {
            MediaKind::Image => row.images += 1,
            MediaKind::Video => row.videos += 1,
        }
        row.total += 1;
    }

    gallery.recent.sort_by(|a, b| b.item.timestamp.cmp(&a.item.timestamp));
    gallery.recent.truncate(20);

    gallery.stats.media_by_user = by_user.into_values().collect();
    gallery.stats.media_by_user.sort_by_key(|row| Reverse(row.total));

    gallery
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOverview {
    pub browsers: Vec<NamedCount>,
    pub operating_systems: Vec<NamedCount>,
    pub devices: DeviceSplit,
    pub screen_sizes: Vec<SizeCount>,
    pub hardware: Vec<HardwareRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeviceSplit {
    pub mobile: u64,
    pub tablet: u64,
    pub desktop: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizeCount {
    pub size: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareRow {
    pub ip: String,
    pub sanitized_ip: String,
    pub browser: String,
    pub os: String,
    pub screen_size: String,
}

/// Device view: browser, OS, and screen-size histograms plus the
/// mobile/tablet/desktop split, one sample per visitor.
pub async fn device_overview(store: &TelemetryStore) -> DeviceOverview {
    let users = build_visitor_summaries(store).await;

    let mut browsers: BTreeMap<String, u64> = BTreeMap::new();
    let mut operating_systems: BTreeMap<String, u64> = BTreeMap::new();
    let mut screen_sizes: BTreeMap<String, u64> = BTreeMap::new();
    let mut devices = DeviceSplit::default();
    let mut hardware = Vec::new();

    for (sanitized_ip, user) in &users {
        *browsers.entry(user.browser_info.browser.clone()).or_default() += 1;
        *operating_systems.entry(user.browser_info.os.clone()).or_default() += 1;

        if user.browser_info.is_mobile {
            devices.mobile += 1;
        } else if user.browser_info.is_tablet {
            devices.tablet += 1;
        } else {
            devices.desktop += 1;
        }

        let screen_size = match &user.screen {
            Some(screen) => {
                let label = screen.label();
                *screen_sizes.entry(label.clone()).or_default() += 1;
                label
            }
            None => UNKNOWN.to_string(),
        };

        hardware.push(HardwareRow {
            ip: user.ip_address.clone(),
            sanitized_ip: sanitized_ip.clone(),
            browser: user.browser_info.browser.clone(),
            os: user.browser_info.os.clone(),
            screen_size,
        });
    }

    DeviceOverview {
        browsers: sorted_counts(browsers),
        operating_systems: sorted_counts(operating_systems),
        devices,
        screen_sizes: screen_sizes
            .into_iter()
            .map(|(size, count)| SizeCount { size, count })
            .collect(),
        hardware,
    }
}

fn sorted_counts(map: BTreeMap<String, u64>) -> Vec<NamedCount> {
    let mut counts: Vec<NamedCount> = map
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect();
    counts.sort_by_key(|entry| Reverse(entry.count));
    counts
}
