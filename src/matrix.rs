use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

/// Returns a `rows x cols` matrix with entries drawn from `N(0, std_dev²)`.
pub fn random_normal<R>(rng: &mut R, rows: usize, cols: usize, std_dev: f64) -> Array2<f64>
where
    R: Rng + ?Sized,
{
    Array2::from_shape_fn((rows, cols), |_| {
        let z: f64 = rng.sample(StandardNormal);
        std_dev * z
    })
}

/// Computes the outer product `a bᵗ`.
pub fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let column = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    column.dot(&row)
}

/// Accumulates `scale * a bᵗ` into `target`.
pub fn add_outer(target: &mut Array2<f64>, scale: f64, a: &Array1<f64>, b: &Array1<f64>) {
    target.scaled_add(scale, &outer(a, b));
}

/// Squared euclidean distance between two vectors.
pub fn squared_distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn outer_product_shape_and_values() {
        let m = outer(&array![1.0, 2.0], &array![3.0, 4.0, 5.0]);
        assert_eq!(m, array![[3.0, 4.0, 5.0], [6.0, 8.0, 10.0]]);
    }

    #[test]
    fn add_outer_accumulates() {
        let mut m = Array2::ones((2, 2));
        add_outer(&mut m, -1.0, &array![1.0, 0.0], &array![0.0, 1.0]);
        assert_eq!(m, array![[1.0, 0.0], [1.0, 1.0]]);
    }

    #[test]
    fn random_normal_is_seeded() {
        let a = random_normal(&mut StdRng::seed_from_u64(1), 3, 2, 0.1);
        let b = random_normal(&mut StdRng::seed_from_u64(1), 3, 2, 0.1);
        assert_eq!(a, b);
        assert_eq!(a.dim(), (3, 2));
    }
}
