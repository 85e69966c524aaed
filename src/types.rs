use ndarray::{ArrayRef, Ix1};

pub type ArrayRef1<T> = ArrayRef<T, Ix1>;
