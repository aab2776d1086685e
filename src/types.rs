//! Shared value types: timestamps, money, actors

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Integer minor units of the store's single currency.
pub type Money = u64;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone> Copy for TimeStamp<T> where T::Offset: Copy {}

impl<T: TimeZone + PartialEq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl std::ops::Add<Duration> for TimeStamp<Utc> {
    type Output = TimeStamp<Utc>;

    fn add(self, rhs: Duration) -> Self::Output {
        TimeStamp(self.0 + rhs)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Who performed a status change. `System` is the automated expiration path.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub enum Actor {
    #[n(0)]
    Buyer(#[n(0)] String),
    #[n(1)]
    Admin(#[n(0)] String),
    #[n(2)]
    System,
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Actor::Buyer(id) | Actor::Admin(id) => id,
            Actor::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn actor_encoding() {
        let original = Actor::Admin("admin_abc".into());

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: Actor = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn adding_duration_moves_forward() {
        let base = TimeStamp::new_with(2025, 1, 1, 12, 0, 0);
        let later = base + chrono::Duration::minutes(30);

        assert_eq!(
            (later.to_datetime_utc() - base.to_datetime_utc()).num_minutes(),
            30
        );
    }
}
