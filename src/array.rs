// Cb execution core: Array Engine (C3, spec.md §4.3).
//
// No teacher counterpart exists (udashboard's `List` is an untyped,
// 1-D `Rc<Vec<Value>>`); this module is built directly from spec.md's
// description of row-major flat storage with one active typed vector
// per element kind, matching the "Typed storage vectors" invariant
// in §3.3.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{CbError, SourceSpan};
use crate::value::{TypeTag, TypedValue, Value};

/// One of the element kinds the engine stores natively (spec.md §3.1,
/// §4.3). `Bool`/`Char` ride in the int vector at their own width
/// rule, matching how `Variable`'s scalar storage treats them.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementKind {
    Bool,
    Int,
    Float,
    Double,
    Quad,
    Char,
    String,
}

impl ElementKind {
    pub fn from_tag(tag: &TypeTag) -> Option<ElementKind> {
        match tag {
            TypeTag::Bool => Some(ElementKind::Bool),
            TypeTag::Int(_) => Some(ElementKind::Int),
            TypeTag::Float => Some(ElementKind::Float),
            TypeTag::Double => Some(ElementKind::Double),
            TypeTag::Quad => Some(ElementKind::Quad),
            TypeTag::Char => Some(ElementKind::Char),
            TypeTag::String => Some(ElementKind::String),
            _ => None,
        }
    }

    pub fn to_tag(&self) -> TypeTag {
        match self {
            ElementKind::Bool => TypeTag::Bool,
            ElementKind::Int => TypeTag::Int(crate::value::IntWidth::Int),
            ElementKind::Float => TypeTag::Float,
            ElementKind::Double => TypeTag::Double,
            ElementKind::Quad => TypeTag::Quad,
            ElementKind::Char => TypeTag::Char,
            ElementKind::String => TypeTag::String,
        }
    }
}

/// Storage for a single array binding: row-major flat vectors, one of
/// which is "active" per `element_kind`. Only the active vector is
/// populated; the others stay empty (spec.md §3.3 I2).
#[derive(Clone, Debug)]
pub struct ArrayStorage {
    pub element_kind: ElementKind,
    pub element_tag: TypeTag,
    pub dimensions: Vec<usize>,
    pub unsigned: bool,
    bools: Vec<bool>,
    ints: Vec<i64>,
    floats: Vec<f32>,
    doubles: Vec<f64>,
    quads: Vec<f64>,
    chars: Vec<u8>,
    strings: Vec<Rc<String>>,
}

pub type ArrayRef = Rc<RefCell<ArrayStorage>>;

impl ArrayStorage {
    /// Construct an array default-filled to `size` = product of
    /// `dimensions`.
    pub fn new_default(element_tag: TypeTag, dimensions: Vec<usize>, unsigned: bool) -> Result<ArrayRef, CbError> {
        let kind = ElementKind::from_tag(&element_tag).ok_or_else(|| {
            CbError::type_mismatch(TypeTag::Unknown, element_tag.clone(), None)
        })?;
        let size: usize = dimensions.iter().product::<usize>().max(if dimensions.is_empty() { 0 } else { 1 });
        let mut storage = ArrayStorage {
            element_kind: kind,
            element_tag,
            dimensions,
            unsigned,
            bools: Vec::new(),
            ints: Vec::new(),
            floats: Vec::new(),
            doubles: Vec::new(),
            quads: Vec::new(),
            chars: Vec::new(),
            strings: Vec::new(),
        };
        storage.fill_default(size);
        Ok(Rc::new(RefCell::new(storage)))
    }

    fn fill_default(&mut self, size: usize) {
        match self.element_kind {
            ElementKind::Bool => self.bools = vec![false; size],
            ElementKind::Int => self.ints = vec![0; size],
            ElementKind::Float => self.floats = vec![0.0; size],
            ElementKind::Double => self.doubles = vec![0.0; size],
            ElementKind::Quad => self.quads = vec![0.0; size],
            ElementKind::Char => self.chars = vec![0; size],
            ElementKind::String => self.strings = vec![Rc::new(String::new()); size],
        }
    }

    pub fn len(&self) -> usize {
        match self.element_kind {
            ElementKind::Bool => self.bools.len(),
            ElementKind::Int => self.ints.len(),
            ElementKind::Float => self.floats.len(),
            ElementKind::Double => self.doubles.len(),
            ElementKind::Quad => self.quads.len(),
            ElementKind::Char => self.chars.len(),
            ElementKind::String => self.strings.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major flat index: `flat = sum(i_k * prod(dim_j, j>k))`.
    pub fn flat_index(&self, indices: &[usize]) -> Result<usize, CbError> {
        if indices.len() > self.dimensions.len() {
            return Err(CbError::runtime(format!(
                "index arity {} exceeds array rank {}",
                indices.len(),
                self.dimensions.len()
            )));
        }
        let mut flat = 0usize;
        for (k, &idx) in indices.iter().enumerate() {
            let trailing: usize = self.dimensions[k + 1..].iter().product::<usize>().max(1);
            flat += idx * trailing;
        }
        Ok(flat)
    }

    fn bounds_check(&self, flat: usize) -> Result<(), CbError> {
        if flat >= self.len() {
            return Err(CbError::ArrayOutOfBounds { index: flat as i64, size: self.len(), span: None });
        }
        Ok(())
    }

    /// `get(var, indices) -> TypedValue` (spec.md §4.3).
    pub fn get(&self, indices: &[usize]) -> Result<TypedValue, CbError> {
        let flat = self.flat_index(indices)?;
        self.bounds_check(flat)?;
        let value = match self.element_kind {
            ElementKind::Bool => Value::Bool(self.bools[flat]),
            ElementKind::Int => Value::Int(self.ints[flat]),
            ElementKind::Float => Value::Float(self.floats[flat]),
            ElementKind::Double => Value::Double(self.doubles[flat]),
            ElementKind::Quad => Value::Quad(self.quads[flat]),
            ElementKind::Char => Value::Char(self.chars[flat]),
            ElementKind::String => Value::Str(self.strings[flat].clone()),
        };
        Ok(TypedValue::new(value, self.element_tag.clone()).unsigned(self.unsigned))
    }

    /// `set(var, indices, TypedValue)`. Writes clamp per the
    /// unsigned policy, same as scalar storage (spec.md §4.2).
    pub fn set(&mut self, indices: &[usize], value: TypedValue, span: Option<SourceSpan>) -> Result<(), CbError> {
        let flat = self.flat_index(indices)?;
        self.bounds_check(flat)?;
        let coerced = value.value.coerce_for_storage(&self.element_tag, self.unsigned, span)?;
        match (&self.element_kind, coerced) {
            (ElementKind::Bool, Value::Bool(b)) => self.bools[flat] = b,
            (ElementKind::Int, Value::Int(i)) => self.ints[flat] = i,
            (ElementKind::Float, Value::Float(f)) => self.floats[flat] = f,
            (ElementKind::Double, Value::Double(d)) => self.doubles[flat] = d,
            (ElementKind::Quad, Value::Quad(d)) => self.quads[flat] = d,
            (ElementKind::Char, Value::Char(c)) => self.chars[flat] = c,
            (ElementKind::String, Value::Str(s)) => self.strings[flat] = s,
            (kind, got) => {
                return Err(CbError::type_mismatch(kind.to_tag(), got.type_of(), None));
            }
        }
        Ok(())
    }

    /// Two arrays are slice-compatible (spec.md §4.3 "Compatibility")
    /// if element kinds match and the remaining-dimension counts
    /// agree, with dimension sizes beyond the fixed prefix equal.
    pub fn compatible_for_slice(&self, other: &ArrayStorage, skip_dims: usize) -> bool {
        if self.element_kind != other.element_kind {
            return false;
        }
        let a = &self.dimensions[skip_dims.min(self.dimensions.len())..];
        let b = &other.dimensions[..];
        a == b
    }

    /// Copy `src[i0..]` (the suffix array starting at the given
    /// leading indices) into `self` at flat offset. Whole-suffix
    /// slicing only, per spec.md §4.3 ("stride or partial-range
    /// slicing is out of scope").
    pub fn copy_slice_from(&mut self, leading: &[usize], src: &ArrayStorage) -> Result<(), CbError> {
        let suffix_len: usize = self.dimensions[leading.len()..]
            .iter()
            .product::<usize>()
            .max(1);
        let start = self.flat_index(leading)?;
        if self.element_kind != src.element_kind {
            return Err(CbError::type_mismatch(
                self.element_kind.to_tag(),
                src.element_kind.to_tag(),
                None,
            ));
        }
        if src.len() != suffix_len {
            return Err(CbError::ArrayShape {
                expected: vec![suffix_len],
                got: vec![src.len()],
                span: None,
            });
        }
        match self.element_kind {
            ElementKind::Bool => self.bools[start..start + suffix_len].clone_from_slice(&src.bools),
            ElementKind::Int => self.ints[start..start + suffix_len].clone_from_slice(&src.ints),
            ElementKind::Float => self.floats[start..start + suffix_len].clone_from_slice(&src.floats),
            ElementKind::Double => self.doubles[start..start + suffix_len].clone_from_slice(&src.doubles),
            ElementKind::Quad => self.quads[start..start + suffix_len].clone_from_slice(&src.quads),
            ElementKind::Char => self.chars[start..start + suffix_len].clone_from_slice(&src.chars),
            ElementKind::String => self.strings[start..start + suffix_len].clone_from_slice(&src.strings),
        }
        Ok(())
    }

    /// Build an array from a fully-flattened literal, checking shape
    /// against `declared_dimensions` exactly when given, or inferring
    /// `array_size`/dimensions from the literal's outer length when
    /// `declared_dimensions` is empty (unsized declaration).
    pub fn from_literal(
        element_tag: TypeTag,
        declared_dimensions: &[usize],
        flat_values: Vec<TypedValue>,
        literal_dimensions: &[usize],
        unsigned: bool,
    ) -> Result<ArrayRef, CbError> {
        let dims: Vec<usize> = if declared_dimensions.is_empty() {
            literal_dimensions.to_vec()
        } else {
            if declared_dimensions != literal_dimensions {
                return Err(CbError::ArrayShape {
                    expected: declared_dimensions.to_vec(),
                    got: literal_dimensions.to_vec(),
                    span: None,
                });
            }
            declared_dimensions.to_vec()
        };
        let arr = ArrayStorage::new_default(element_tag, dims, unsigned)?;
        {
            let mut storage = arr.borrow_mut();
            for (flat, value) in flat_values.into_iter().enumerate() {
                let idx = storage.unflatten(flat);
                storage.set(&idx, value, None)?;
            }
        }
        Ok(arr)
    }

    fn unflatten(&self, mut flat: usize) -> Vec<usize> {
        let mut out = vec![0usize; self.dimensions.len()];
        for k in 0..self.dimensions.len() {
            let trailing: usize = self.dimensions[k + 1..].iter().product::<usize>().max(1);
            out[k] = flat / trailing;
            flat %= trailing;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::IntWidth;

    fn ints(dims: Vec<usize>) -> ArrayRef {
        ArrayStorage::new_default(TypeTag::Int(IntWidth::Int), dims, false).unwrap()
    }

    #[test]
    fn flat_index_row_major_2d() {
        let a = ints(vec![2, 3]);
        let s = a.borrow();
        assert_eq!(s.flat_index(&[0, 0]).unwrap(), 0);
        assert_eq!(s.flat_index(&[0, 2]).unwrap(), 2);
        assert_eq!(s.flat_index(&[1, 0]).unwrap(), 3);
        assert_eq!(s.flat_index(&[1, 2]).unwrap(), 5);
    }

    #[test]
    fn get_set_round_trip() {
        let a = ints(vec![2, 3]);
        a.borrow_mut().set(&[1, 2], TypedValue::int(9), None).unwrap();
        assert_eq!(a.borrow().get(&[1, 2]).unwrap().value.as_i64(), Some(9));
    }

    #[test]
    fn out_of_bounds_get_and_set_fail() {
        let a = ints(vec![3]);
        assert!(a.borrow().get(&[3]).is_err());
        assert!(a.borrow_mut().set(&[3], TypedValue::int(1), None).is_err());
        assert!(a.borrow().get(&[0]).is_ok());
    }

    #[test]
    fn unsigned_clamp_on_element_write() {
        let a = ArrayStorage::new_default(TypeTag::Int(IntWidth::Int), vec![3], true).unwrap();
        let vals = [1i64, -2, 3];
        for (i, v) in vals.iter().enumerate() {
            a.borrow_mut().set(&[i], TypedValue::int(*v), None).unwrap();
        }
        assert_eq!(a.borrow().get(&[0]).unwrap().value.as_i64(), Some(1));
        assert_eq!(a.borrow().get(&[1]).unwrap().value.as_i64(), Some(0));
        assert_eq!(a.borrow().get(&[2]).unwrap().value.as_i64(), Some(3));
    }

    #[test]
    fn literal_shape_mismatch_is_rejected() {
        let result = ArrayStorage::from_literal(
            TypeTag::Int(IntWidth::Int),
            &[2, 2],
            vec![TypedValue::int(1), TypedValue::int(2), TypedValue::int(3)],
            &[3],
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unsized_declaration_infers_size_from_literal() {
        let arr = ArrayStorage::from_literal(
            TypeTag::Int(IntWidth::Int),
            &[],
            vec![TypedValue::int(1), TypedValue::int(2), TypedValue::int(3)],
            &[3],
            false,
        )
        .unwrap();
        assert_eq!(arr.borrow().len(), 3);
    }

    #[test]
    fn two_d_literal_matches_exactly() {
        let arr = ArrayStorage::from_literal(
            TypeTag::Int(IntWidth::Int),
            &[2, 3],
            (1..=6).map(TypedValue::int).collect(),
            &[2, 3],
            false,
        )
        .unwrap();
        assert_eq!(arr.borrow().get(&[1, 2]).unwrap().value.as_i64(), Some(6));
    }

    #[test]
    fn slice_copy_whole_suffix() {
        let dest = ints(vec![2, 3]);
        let src = ints(vec![3]);
        for i in 0..3 {
            src.borrow_mut().set(&[i], TypedValue::int(10 + i as i64), None).unwrap();
        }
        dest.borrow_mut().copy_slice_from(&[1], &src.borrow()).unwrap();
        assert_eq!(dest.borrow().get(&[1, 0]).unwrap().value.as_i64(), Some(10));
        assert_eq!(dest.borrow().get(&[1, 2]).unwrap().value.as_i64(), Some(12));
    }
}
