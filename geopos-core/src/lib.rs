pub mod document;
pub mod projection;
pub mod records;

pub mod geometry {
    use std::fmt;
    use std::str::FromStr;

    use glam::DVec2;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    /// 二维点，内部以 `glam::DVec2` 表示。测量坐标、文档坐标和视口坐标共用此类型。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 二维位移。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn is_zero(self) -> bool {
            self.0 == DVec2::ZERO
        }

        #[inline]
        pub fn negate(self) -> Self {
            Self(-self.0)
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    #[error("invalid transform matrix: {0:?}")]
    pub struct TransformParseError(pub String);

    /// SVG 风格的仿射矩阵 `matrix(a b c d e f)`，`(e, f)` 为视口平移量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Transform {
        pub a: f64,
        pub b: f64,
        pub c: f64,
        pub d: f64,
        pub e: f64,
        pub f: f64,
    }

    impl Transform {
        pub const IDENTITY: Transform = Transform {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        };

        #[inline]
        pub fn translation(position: Point2) -> Self {
            Self {
                e: position.x(),
                f: position.y(),
                ..Self::IDENTITY
            }
        }

        /// 按测量角度（度，逆时针）放置符号。视口 y 轴向下，因此矩阵使用 `-angle`。
        pub fn placement(angle_degrees: f64, position: Point2) -> Self {
            let radians = (-angle_degrees).to_radians();
            let (sin, cos) = radians.sin_cos();
            Self {
                a: cos,
                b: sin,
                c: -sin,
                d: cos,
                e: position.x(),
                f: position.y(),
            }
        }

        /// 竖排（旋转 90°）的图框矩阵 `matrix(0 -1 1 0 e f)`。
        #[inline]
        pub fn upright(position: Point2) -> Self {
            Self {
                a: 0.0,
                b: -1.0,
                c: 1.0,
                d: 0.0,
                e: position.x(),
                f: position.y(),
            }
        }

        #[inline]
        pub fn position(&self) -> Point2 {
            Point2::new(self.e, self.f)
        }

        #[inline]
        pub fn set_position(&mut self, position: Point2) {
            self.e = position.x();
            self.f = position.y();
        }

        #[inline]
        pub fn translate(&mut self, offset: Vector2) {
            self.e += offset.x();
            self.f += offset.y();
        }

        /// 导出用的整数旋转角，取值范围 `0..360`。
        pub fn rotation_degrees(&self) -> i32 {
            let degrees = self.c.atan2(self.a).to_degrees();
            // 浮点误差会把 45.0 算成 44.999...，截断前先补偿
            let whole = (degrees + degrees.signum() * 1e-6).trunc() as i32;
            (whole + 360) % 360
        }

        /// 翻转 180°：仅对 2×2 部分取反，平移保持不变。
        #[inline]
        pub fn inverted(&self) -> Self {
            Self {
                a: -self.a,
                b: -self.b,
                c: -self.c,
                d: -self.d,
                ..*self
            }
        }
    }

    impl Default for Transform {
        fn default() -> Self {
            Self::IDENTITY
        }
    }

    impl fmt::Display for Transform {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "matrix({} {} {} {} {} {})",
                self.a, self.b, self.c, self.d, self.e, self.f
            )
        }
    }

    impl FromStr for Transform {
        type Err = TransformParseError;

        fn from_str(text: &str) -> Result<Self, Self::Err> {
            let body = text
                .trim()
                .strip_prefix("matrix(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| TransformParseError(text.to_string()))?;
            let values = body
                .split(|ch: char| ch == ',' || ch.is_whitespace())
                .filter(|part| !part.is_empty())
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| TransformParseError(text.to_string()))?;
            let [a, b, c, d, e, f] = values[..] else {
                return Err(TransformParseError(text.to_string()));
            };
            Ok(Self { a, b, c, d, e, f })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn placement_round_trips_rotation() {
            for angle in [0.0, 45.0, 90.0, 135.0, 270.0, 330.0] {
                let transform = Transform::placement(angle, Point2::new(1.0, 2.0));
                assert_eq!(transform.rotation_degrees(), angle as i32);
            }
        }

        #[test]
        fn placement_negates_angle_for_viewport() {
            let transform = Transform::placement(90.0, Point2::new(0.0, 0.0));
            assert!(transform.a.abs() < 1e-12);
            assert!((transform.b + 1.0).abs() < 1e-12);
            assert!((transform.c - 1.0).abs() < 1e-12);
        }

        #[test]
        fn matrix_text_round_trip() {
            let transform: Transform = "matrix(0 -1 1 0 12.5 7)".parse().expect("解析矩阵");
            assert_eq!(transform, Transform::upright(Point2::new(12.5, 7.0)));
            let reparsed: Transform = transform.to_string().parse().expect("再次解析");
            assert_eq!(reparsed, transform);
        }

        #[test]
        fn malformed_matrix_is_rejected() {
            assert!("matrix(1 0 0 1 5)".parse::<Transform>().is_err());
            assert!("translate(1 2)".parse::<Transform>().is_err());
            assert!("matrix(a b c d e f)".parse::<Transform>().is_err());
        }

        #[test]
        fn inverted_keeps_translation() {
            let transform = Transform::translation(Point2::new(3.0, 4.0)).inverted();
            assert_eq!(transform.a, -1.0);
            assert_eq!(transform.d, -1.0);
            assert_eq!(transform.position(), Point2::new(3.0, 4.0));
        }
    }
}
