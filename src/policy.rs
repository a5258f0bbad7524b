//! Venue policy: service periods, turn-time bands and buffers.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::model::{BookingWindow, MINUTE_MS, Ms, Span};
use crate::time::{local_to_ms, ms_to_local};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Breakfast,
    Brunch,
    Lunch,
    Dinner,
    Drinks,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Breakfast => "breakfast",
            ServiceType::Brunch => "brunch",
            ServiceType::Lunch => "lunch",
            ServiceType::Dinner => "dinner",
            ServiceType::Drinks => "drinks",
        }
    }
}

impl std::str::FromStr for ServiceType {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "breakfast" => Ok(ServiceType::Breakfast),
            "brunch" => Ok(ServiceType::Brunch),
            "lunch" => Ok(ServiceType::Lunch),
            "dinner" => Ok(ServiceType::Dinner),
            "drinks" => Ok(ServiceType::Drinks),
            other => Err(AllocationError::input(format!("unknown service '{other}'"))),
        }
    }
}

/// Turn time for parties up to `max_party_size` guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationBand {
    pub max_party_size: u32,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePeriod {
    pub service: ServiceType,
    pub opens: NaiveTime,
    pub closes: NaiveTime,
    pub default_duration_minutes: u32,
    #[serde(default)]
    pub duration_bands: Vec<DurationBand>,
}

impl ServicePeriod {
    /// Length of the service; a period closing at or before it opens runs
    /// past midnight.
    pub fn minutes(&self) -> u32 {
        let mut span = self.closes.signed_duration_since(self.opens);
        if span <= Duration::zero() {
            span += Duration::hours(24);
        }
        span.num_minutes().max(0) as u32
    }

    /// Smallest band that fits the party. Parties above every band get the
    /// top band; the default applies only when no bands are configured.
    fn duration_for(&self, party_size: u32) -> u32 {
        let mut bands = self.duration_bands.clone();
        bands.sort_by_key(|b| b.max_party_size);
        bands
            .iter()
            .find(|b| party_size <= b.max_party_size)
            .or(bands.last())
            .map(|b| b.minutes)
            .unwrap_or(self.default_duration_minutes)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPolicy {
    pub pre_minutes: u32,
    pub post_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePolicy {
    pub timezone: Tz,
    pub services: Vec<ServicePeriod>,
    #[serde(default)]
    pub buffer: BufferPolicy,
    /// Used when a service has no period configured.
    pub default_duration_minutes: u32,
}

impl Default for VenuePolicy {
    fn default() -> Self {
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();
        Self {
            timezone: Tz::UTC,
            services: vec![
                ServicePeriod {
                    service: ServiceType::Lunch,
                    opens: hm(12, 0),
                    closes: hm(15, 0),
                    default_duration_minutes: 90,
                    duration_bands: vec![
                        DurationBand { max_party_size: 2, minutes: 75 },
                        DurationBand { max_party_size: 4, minutes: 90 },
                        DurationBand { max_party_size: 8, minutes: 105 },
                    ],
                },
                ServicePeriod {
                    service: ServiceType::Dinner,
                    opens: hm(17, 0),
                    closes: hm(23, 0),
                    default_duration_minutes: 120,
                    duration_bands: vec![
                        DurationBand { max_party_size: 2, minutes: 90 },
                        DurationBand { max_party_size: 4, minutes: 105 },
                        DurationBand { max_party_size: 6, minutes: 120 },
                        DurationBand { max_party_size: 10, minutes: 150 },
                    ],
                },
                ServicePeriod {
                    service: ServiceType::Drinks,
                    opens: hm(16, 0),
                    closes: hm(23, 59),
                    default_duration_minutes: 60,
                    duration_bands: Vec::new(),
                },
            ],
            buffer: BufferPolicy {
                pre_minutes: 0,
                post_minutes: 15,
            },
            default_duration_minutes: 90,
        }
    }
}

impl VenuePolicy {
    pub fn service(&self, service: ServiceType) -> Option<&ServicePeriod> {
        self.services.iter().find(|p| p.service == service)
    }

    /// Turn time for a party, by capacity tier.
    pub fn duration_minutes(&self, service: ServiceType, party_size: u32) -> u32 {
        self.service(service)
            .map(|p| p.duration_for(party_size))
            .unwrap_or(self.default_duration_minutes)
    }

    pub fn service_minutes(&self, service: ServiceType) -> u32 {
        self.service(service).map(ServicePeriod::minutes).unwrap_or(0)
    }

    /// Derive the dining and block spans for a booking starting at a
    /// venue-local wall time.
    pub fn booking_window(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        party_size: u32,
        service: ServiceType,
    ) -> Result<BookingWindow, AllocationError> {
        if party_size == 0 {
            return Err(AllocationError::input("party size must be positive"));
        }
        let start = local_to_ms(date, start_time, self.timezone).ok_or_else(|| {
            AllocationError::input(format!("cannot resolve {date} {start_time} in {}", self.timezone))
        })?;
        let duration = self.duration_minutes(service, party_size) as Ms * MINUTE_MS;
        if duration <= 0 {
            return Err(AllocationError::input(format!(
                "no turn time configured for {}",
                service.as_str()
            )));
        }
        let dining = Span::new(start, start + duration);
        let block = Span::new(
            dining.start - self.buffer.pre_minutes as Ms * MINUTE_MS,
            dining.end + self.buffer.post_minutes as Ms * MINUTE_MS,
        );
        Ok(BookingWindow {
            service,
            party_size,
            dining,
            block,
        })
    }

    /// Local wall-clock bounds of a service on a date.
    pub fn service_bounds(&self, date: NaiveDate, service: ServiceType) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let period = self.service(service)?;
        let opens = date.and_time(period.opens);
        Some((opens, opens + Duration::minutes(period.minutes() as i64)))
    }

    /// `HH:MM` in venue-local time.
    pub fn local_label(&self, ms: Ms) -> Option<String> {
        ms_to_local(ms, self.timezone).map(|t| t.format("%H:%M").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 12).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn duration_bands_pick_smallest_fitting_tier() {
        let policy = VenuePolicy::default();
        assert_eq!(policy.duration_minutes(ServiceType::Dinner, 2), 90);
        assert_eq!(policy.duration_minutes(ServiceType::Dinner, 3), 105);
        assert_eq!(policy.duration_minutes(ServiceType::Dinner, 6), 120);
        assert_eq!(policy.duration_minutes(ServiceType::Dinner, 10), 150);
    }

    #[test]
    fn parties_above_the_top_band_keep_the_longest_turn() {
        let policy = VenuePolicy::default();
        assert_eq!(policy.duration_minutes(ServiceType::Dinner, 12), 150);
        assert_eq!(policy.duration_minutes(ServiceType::Lunch, 20), 105);
        // No bands at all: the period default.
        assert_eq!(policy.duration_minutes(ServiceType::Drinks, 12), 60);
    }

    #[test]
    fn unknown_service_uses_venue_default() {
        let policy = VenuePolicy::default();
        assert_eq!(policy.duration_minutes(ServiceType::Brunch, 4), 90);
        assert_eq!(policy.service_minutes(ServiceType::Brunch), 0);
    }

    #[test]
    fn block_adds_buffers_around_dining() {
        let mut policy = VenuePolicy::default();
        policy.buffer = BufferPolicy {
            pre_minutes: 10,
            post_minutes: 15,
        };
        let w = policy
            .booking_window(date(), hm(19, 0), 4, ServiceType::Dinner)
            .unwrap();
        assert_eq!(w.dining.duration_ms(), 105 * MINUTE_MS);
        assert_eq!(w.block.start, w.dining.start - 10 * MINUTE_MS);
        assert_eq!(w.block.end, w.dining.end + 15 * MINUTE_MS);
    }

    #[test]
    fn zero_party_is_input_error() {
        let policy = VenuePolicy::default();
        let err = policy
            .booking_window(date(), hm(19, 0), 0, ServiceType::Dinner)
            .unwrap_err();
        assert!(matches!(err, AllocationError::Input(_)));
    }

    #[test]
    fn service_minutes_wrap_midnight() {
        let period = ServicePeriod {
            service: ServiceType::Drinks,
            opens: hm(22, 0),
            closes: hm(2, 0),
            default_duration_minutes: 60,
            duration_bands: Vec::new(),
        };
        assert_eq!(period.minutes(), 240);
    }

    #[test]
    fn local_label_uses_venue_timezone() {
        let policy = VenuePolicy {
            timezone: chrono_tz::Europe::Paris,
            ..VenuePolicy::default()
        };
        let w = policy
            .booking_window(date(), hm(19, 30), 2, ServiceType::Dinner)
            .unwrap();
        assert_eq!(policy.local_label(w.dining.start).as_deref(), Some("19:30"));
    }

    #[test]
    fn policy_parses_from_json() {
        let json = r#"{
            "timezone": "America/New_York",
            "services": [{
                "service": "lunch",
                "opens": "12:00:00",
                "closes": "15:00:00",
                "default_duration_minutes": 90
            }],
            "default_duration_minutes": 60
        }"#;
        let policy: VenuePolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.timezone, chrono_tz::America::New_York);
        assert_eq!(policy.service_minutes(ServiceType::Lunch), 180);
        assert_eq!(policy.buffer, BufferPolicy::default());
    }
}
