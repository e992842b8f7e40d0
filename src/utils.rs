use ndarray::{ArrayBase, Data, DataMut, Dimension};

/// A trait to replace all elements in a container with zeros.
pub trait ZeroOut {
    fn zero_out(&mut self);
}

impl<S, D> ZeroOut for ArrayBase<S, D>
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    fn zero_out(&mut self) {
        self.fill(0.0);
    }
}

impl<T> ZeroOut for Option<T>
where
    T: ZeroOut,
{
    fn zero_out(&mut self) {
        if let Some(inner) = self {
            inner.zero_out();
        }
    }
}

/// A trait to check that every element in a container is finite.
pub trait AllFinite {
    fn all_finite(&self) -> bool;
}

impl<S, D> AllFinite for ArrayBase<S, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    fn all_finite(&self) -> bool {
        self.iter().all(|x| x.is_finite())
    }
}

impl<T> AllFinite for Option<T>
where
    T: AllFinite,
{
    fn all_finite(&self) -> bool {
        self.as_ref().map_or(true, |inner| inner.all_finite())
    }
}
