use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::geo::Position;

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> AppResult<Position>;
}

/// Reports a fix supplied up front (config or `--at`). A terminal has no
/// positioning hardware to ask, so without one the lookup fails.
#[derive(Debug, Clone, Default)]
pub struct FixedGeolocator {
    fix: Option<Position>,
}

impl FixedGeolocator {
    pub fn new(fix: Option<Position>) -> Self {
        Self { fix }
    }
}

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn current_position(&self) -> AppResult<Position> {
        let fix = self
            .fix
            .ok_or_else(|| AppError::Geolocation("position unavailable".into()))?;
        if !fix.is_valid() {
            return Err(AppError::Geolocation(format!(
                "invalid coordinates {}, {}",
                fix.latitude, fix.longitude
            )));
        }
        Ok(fix.with_fix(fix.accuracy, OffsetDateTime::now_utc()))
    }
}

/// Parses `LAT,LON` as accepted by `--at`.
pub fn parse_coordinates(input: &str) -> Result<Position, String> {
    let (lat, lon) = input
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON but got {input:?}"))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|_| format!("invalid latitude {:?}", lat.trim()))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|_| format!("invalid longitude {:?}", lon.trim()))?;
    let position = Position::new(latitude, longitude);
    if !position.is_valid() {
        return Err(format!("coordinates out of range: {latitude}, {longitude}"));
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_geolocator_stamps_the_fix() -> anyhow::Result<()> {
        let geo = FixedGeolocator::new(Some(Position::new(40.0, -3.7)));
        let fix = geo.current_position().await?;
        assert!(fix.same_place(&Position::new(40.0, -3.7)));
        assert!(fix.timestamp.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn missing_fix_is_a_geolocation_error() {
        let err = FixedGeolocator::default().current_position().await.unwrap_err();
        assert_eq!(err, AppError::Geolocation("position unavailable".into()));
    }

    #[test]
    fn parses_coordinate_pairs() {
        assert_eq!(parse_coordinates("1.5, -2").unwrap(), Position::new(1.5, -2.0));
        assert!(parse_coordinates("1.5").is_err());
        assert!(parse_coordinates("north,2").is_err());
        assert!(parse_coordinates("100,2").is_err());
    }
}
