use geopos_core::geometry::Point2;
use geopos_core::projection::{Datum, GeodeticTransform, GeodeticTransformError};

const EAST_OFFSET: f64 = 2_000_000.0;
const NORTH_OFFSET: f64 = 1_000_000.0;

/// LV03 与 LV95 之间按固定偏移换算，精度只到米级的近似。
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftTransform;

impl GeodeticTransform for ShiftTransform {
    fn transform(
        &self,
        point: Point2,
        source: Datum,
        target: Datum,
    ) -> Result<Point2, GeodeticTransformError> {
        let (dx, dy) = match (source, target) {
            (Datum::Lv03, Datum::Lv95) => (EAST_OFFSET, NORTH_OFFSET),
            (Datum::Lv95, Datum::Lv03) => (-EAST_OFFSET, -NORTH_OFFSET),
            _ => (0.0, 0.0),
        };
        Ok(Point2::new(point.x() + dx, point.y() + dy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lv03_points_gain_the_lv95_prefix() {
        let point = ShiftTransform
            .transform(Point2::new(683_253.0, 246_390.0), Datum::Lv03, Datum::Lv95)
            .expect("换算");
        assert!((point.x() - 2_683_253.0).abs() < 1e-9);
        assert!((point.y() - 1_246_390.0).abs() < 1e-9);

        let back = ShiftTransform
            .transform(point, Datum::Lv95, Datum::Lv03)
            .expect("反向换算");
        assert!((back.x() - 683_253.0).abs() < 1e-9);
    }

    #[test]
    fn same_datum_is_identity() {
        let point = ShiftTransform
            .transform(Point2::new(1.5, 2.5), Datum::Lv95, Datum::Lv95)
            .expect("换算");
        assert!((point.x() - 1.5).abs() < 1e-9);
        assert!((point.y() - 2.5).abs() < 1e-9);
    }
}
