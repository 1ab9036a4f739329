//! JSON-safe encoding for float arrays that may carry NaN.
//!
//! Disqualified records legitimately produce NaN-filled coefficient rows,
//! but JSON has no NaN literal and serde_json silently writes `null` it then
//! refuses to read back. These adapters round-trip the arrays exactly:
//! finite values keep their shortest-round-trip decimal form, non-finite
//! entries become `null` and come back as NaN.

use ndarray::{Array1, Array2, Array3};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
struct Packed {
    shape: Vec<usize>,
    data: Vec<Option<f64>>,
}

fn pack<'a>(shape: Vec<usize>, values: impl Iterator<Item = &'a f64>) -> Packed {
    Packed {
        shape,
        data: values
            .map(|&v| if v.is_finite() { Some(v) } else { None })
            .collect(),
    }
}

fn unpack(data: Vec<Option<f64>>) -> Vec<f64> {
    data.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

pub mod array1 {
    use super::*;

    pub fn serialize<S: Serializer>(arr: &Array1<f64>, s: S) -> Result<S::Ok, S::Error> {
        pack(vec![arr.len()], arr.iter()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Array1<f64>, D::Error> {
        let p = Packed::deserialize(d)?;
        if p.shape.len() != 1 || p.shape[0] != p.data.len() {
            return Err(D::Error::custom("1-d array shape does not match payload"));
        }
        Ok(Array1::from_vec(unpack(p.data)))
    }
}

pub mod array2 {
    use super::*;

    pub fn serialize<S: Serializer>(arr: &Array2<f64>, s: S) -> Result<S::Ok, S::Error> {
        pack(arr.shape().to_vec(), arr.iter()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Array2<f64>, D::Error> {
        let p = Packed::deserialize(d)?;
        if p.shape.len() != 2 {
            return Err(D::Error::custom("expected a 2-d array shape"));
        }
        Array2::from_shape_vec((p.shape[0], p.shape[1]), unpack(p.data))
            .map_err(|e| D::Error::custom(format!("2-d array shape does not match payload: {e}")))
    }
}

pub mod array3 {
    use super::*;

    pub fn serialize<S: Serializer>(arr: &Array3<f64>, s: S) -> Result<S::Ok, S::Error> {
        pack(arr.shape().to_vec(), arr.iter()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Array3<f64>, D::Error> {
        let p = Packed::deserialize(d)?;
        if p.shape.len() != 3 {
            return Err(D::Error::custom("expected a 3-d array shape"));
        }
        Array3::from_shape_vec((p.shape[0], p.shape[1], p.shape[2]), unpack(p.data))
            .map_err(|e| D::Error::custom(format!("3-d array shape does not match payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[derive(Serialize, Deserialize)]
    struct Wrap2 {
        #[serde(with = "crate::persist::array2")]
        a: Array2<f64>,
    }

    #[derive(Serialize, Deserialize)]
    struct Wrap1 {
        #[serde(with = "crate::persist::array1")]
        a: Array1<f64>,
    }

    #[test]
    fn finite_values_round_trip_bit_for_bit() {
        let a = array![[1.0, 0.1 + 0.2], [-3.25e-17, 7.0]];
        let text = serde_json::to_string(&Wrap2 { a: a.clone() }).unwrap();
        let back: Wrap2 = serde_json::from_str(&text).unwrap();
        for (x, y) in back.a.iter().zip(a.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn nan_entries_survive_the_round_trip() {
        let a = array![f64::NAN, 2.0, f64::NAN];
        let text = serde_json::to_string(&Wrap1 { a }).unwrap();
        let back: Wrap1 = serde_json::from_str(&text).unwrap();
        assert!(back.a[0].is_nan());
        assert_eq!(back.a[1], 2.0);
        assert!(back.a[2].is_nan());
    }

    #[test]
    fn shape_mismatch_is_a_parse_error() {
        let text = r#"{"a":{"shape":[2,2],"data":[1.0,2.0,3.0]}}"#;
        assert!(serde_json::from_str::<Wrap2>(text).is_err());
    }
}
