//! # Baby Jubjub
//!
//! The twisted Edwards curve embedded in the BN254 scalar field, with
//! circomlib's parameters:
//!
//! ```text
//! a x^2 + y^2 = 1 + d x^2 y^2    a = 168700, d = 168696   (over Fr)
//! ```
//!
//! Coordinates are `Fr` elements, so a public key is two field elements the
//! circuits can consume directly. Scalars are plain integers reduced by the
//! prime subgroup order `l` where the signature scheme asks for it.
//!
//! `ark-ed-on-bn254` ships the same curve in a rescaled model with different
//! coordinates, which would produce public keys the circuits do not
//! recognise. Hence the handful of formulas below.

use ark_bn254::Fr;
use ark_ff::{Field, MontFp, One, Zero};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::field;

/// Curve coefficient `a`.
const A: Fr = MontFp!("168700");

/// Curve coefficient `d`.
const D: Fr = MontFp!("168696");

/// `B8 = 8 * G`, the generator of the prime-order subgroup.
const B8_X: Fr =
    MontFp!("5299619240641551281634865583518297030282874472190772894086521144482721001553");
const B8_Y: Fr =
    MontFp!("16950150798460657717958625567821834550301663161624707787222815936182638968203");

/// Order of the prime subgroup generated by `B8`.
const SUBGROUP_ORDER: &[u8] =
    b"2736030358979909402780800718157159386076813972158567259200215660948447373041";

/// Order `l` of the subgroup generated by [`Point::base8`].
pub fn subgroup_order() -> BigUint {
    BigUint::parse_bytes(SUBGROUP_ORDER, 10).expect("subgroup order literal is valid decimal")
}

/// An affine point on Baby Jubjub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: Fr,
    pub y: Fr,
}

impl Point {
    /// The neutral element `(0, 1)`.
    pub fn identity() -> Self {
        Self {
            x: Fr::zero(),
            y: Fr::one(),
        }
    }

    /// The subgroup generator used for keys and signatures.
    pub fn base8() -> Self {
        Self { x: B8_X, y: B8_Y }
    }

    /// `true` if the point satisfies the curve equation.
    pub fn is_on_curve(&self) -> bool {
        let x2 = self.x.square();
        let y2 = self.y.square();
        A * x2 + y2 == Fr::one() + D * x2 * y2
    }

    /// Twisted Edwards addition.
    ///
    /// The formulas are complete on Baby Jubjub (`a` is a square, `d` is
    /// not), so neither denominator vanishes for points on the curve.
    pub fn add(&self, other: &Point) -> Point {
        let x1x2 = self.x * other.x;
        let y1y2 = self.y * other.y;
        let dxy = D * x1x2 * y1y2;

        let x_num = self.x * other.y + self.y * other.x;
        let y_num = y1y2 - A * x1x2;
        let x_den = (Fr::one() + dxy)
            .inverse()
            .expect("complete addition law has non-zero denominators");
        let y_den = (Fr::one() - dxy)
            .inverse()
            .expect("complete addition law has non-zero denominators");

        Point {
            x: x_num * x_den,
            y: y_num * y_den,
        }
    }

    /// Scalar multiplication by double-and-add, most significant bit first.
    pub fn mul_scalar(&self, scalar: &BigUint) -> Point {
        let mut acc = Point::identity();
        for i in (0..scalar.bits()).rev() {
            acc = acc.add(&acc);
            if scalar.bit(i) {
                acc = acc.add(self);
            }
        }
        acc
    }
}

/// Decimal-string serde form, the same encoding witness files use.
#[derive(Serialize, Deserialize)]
struct PointRepr {
    x: String,
    y: String,
}

impl Serialize for Point {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PointRepr {
            x: field::to_decimal(&self.x),
            y: field::to_decimal(&self.y),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let repr = PointRepr::deserialize(deserializer)?;
        let x = field::from_decimal(&repr.x)
            .ok_or_else(|| D::Error::custom("x coordinate is not a field element"))?;
        let y = field::from_decimal(&repr.y)
            .ok_or_else(|| D::Error::custom("y coordinate is not a field element"))?;
        let point = Point { x, y };
        if !point.is_on_curve() {
            return Err(D::Error::custom("point is not on Baby Jubjub"));
        }
        Ok(point)
    }
}
