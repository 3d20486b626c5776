use serde::{Deserialize, Serialize};

use crate::{
    floating_type_mod::{FT, PI},
    V2,
};

/// Lengths below `GUARD_FACTOR * h` are treated as colocated particles.
const GUARD_FACTOR: FT = 1.0e-5;

/**
 * Radially symmetric weighting function with compact support `h`.
 *
 * `r` is always the offset `x_i - x_j`. All three forms return exactly zero
 * for `|r| > h`.
 */
pub trait SmoothingKernel {
    fn value(&self, r: V2, h: FT) -> FT;
    fn gradient(&self, r: V2, h: FT) -> V2;
    fn laplacian(&self, r: V2, h: FT) -> FT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelType {
    Poly6,
    Spiky,
    Viscosity,
    CubicSpline,
}

pub const ALL_KERNEL_TYPES: [KernelType; 4] = [
    KernelType::Poly6,
    KernelType::Spiky,
    KernelType::Viscosity,
    KernelType::CubicSpline,
];

impl KernelType {
    pub fn as_str_lowercase(&self) -> &'static str {
        match self {
            KernelType::Poly6 => "poly6",
            KernelType::Spiky => "spiky",
            KernelType::Viscosity => "viscosity",
            KernelType::CubicSpline => "cubic spline",
        }
    }

    /// Kernel value for colocated particles (the self contribution).
    pub fn peak_value(&self, h: FT) -> FT {
        self.value(V2::zeros(), h)
    }
}

impl SmoothingKernel for KernelType {
    #[inline(always)]
    fn value(&self, r: V2, h: FT) -> FT {
        match self {
            KernelType::Poly6 => Poly6.value(r, h),
            KernelType::Spiky => Spiky.value(r, h),
            KernelType::Viscosity => Viscosity.value(r, h),
            KernelType::CubicSpline => CubicSpline.value(r, h),
        }
    }

    #[inline(always)]
    fn gradient(&self, r: V2, h: FT) -> V2 {
        match self {
            KernelType::Poly6 => Poly6.gradient(r, h),
            KernelType::Spiky => Spiky.gradient(r, h),
            KernelType::Viscosity => Viscosity.gradient(r, h),
            KernelType::CubicSpline => CubicSpline.gradient(r, h),
        }
    }

    #[inline(always)]
    fn laplacian(&self, r: V2, h: FT) -> FT {
        match self {
            KernelType::Poly6 => Poly6.laplacian(r, h),
            KernelType::Spiky => Spiky.laplacian(r, h),
            KernelType::Viscosity => Viscosity.laplacian(r, h),
            KernelType::CubicSpline => CubicSpline.laplacian(r, h),
        }
    }
}

/// Müller et al. 2003, normalized for 2D: W = 4 / (PI h^8) * (h^2 - r^2)^3
pub struct Poly6;

impl Poly6 {
    fn scale(h: FT) -> FT {
        4. / (PI * h.powi(8))
    }
}

impl SmoothingKernel for Poly6 {
    fn value(&self, r: V2, h: FT) -> FT {
        let r2 = r.norm_squared();
        if r2 > h * h {
            return 0.;
        }
        let sub = h * h - r2;
        Self::scale(h) * sub * sub * sub
    }

    fn gradient(&self, r: V2, h: FT) -> V2 {
        let r2 = r.norm_squared();
        if r2 > h * h {
            return V2::zeros();
        }
        let sub = h * h - r2;
        r * (-6. * Self::scale(h) * sub * sub)
    }

    fn laplacian(&self, r: V2, h: FT) -> FT {
        let r2 = r.norm_squared();
        if r2 > h * h {
            return 0.;
        }
        let sub = h * h - r2;
        12. * Self::scale(h) * sub * (3. * r2 - h * h)
    }
}

/// Debrun's spiky kernel, normalized for 2D: W = 10 / (PI h^5) * (h - r)^3
pub struct Spiky;

impl Spiky {
    fn scale(h: FT) -> FT {
        10. / (PI * h.powi(5))
    }
}

impl SmoothingKernel for Spiky {
    fn value(&self, r: V2, h: FT) -> FT {
        let length = r.norm();
        if length > h {
            return 0.;
        }
        let sub = h - length;
        Self::scale(h) * sub * sub * sub
    }

    fn gradient(&self, r: V2, h: FT) -> V2 {
        let length = r.norm();
        if length > h || length <= GUARD_FACTOR * h {
            return V2::zeros();
        }
        let sub = h - length;
        r * (-3. * Self::scale(h) * sub * sub / length)
    }

    fn laplacian(&self, r: V2, h: FT) -> FT {
        let length = r.norm();
        if length > h || length <= GUARD_FACTOR * h {
            return 0.;
        }
        let sub = h - length;
        3. * Self::scale(h) * sub * (3. * length - h) / length
    }
}

/**
 * Viscosity kernel of Müller et al. 2003 with 2D normalization
 * W = 10 / (3 PI h^2) * (-r^3/(2h^3) + r^2/h^2 + h/(2r) - 1).
 *
 * The Laplacian is the usual positive 2D form 40 / (PI h^5) * (h - r)
 * instead of the exact (singular) one.
 */
pub struct Viscosity;

impl Viscosity {
    fn scale(h: FT) -> FT {
        10. / (3. * PI * h * h)
    }
}

impl SmoothingKernel for Viscosity {
    fn value(&self, r: V2, h: FT) -> FT {
        let length = r.norm();
        if length > h || length <= GUARD_FACTOR * h {
            return 0.;
        }
        let q = length / h;
        Self::scale(h) * (-0.5 * q * q * q + q * q + 0.5 / q - 1.)
    }

    fn gradient(&self, r: V2, h: FT) -> V2 {
        let length = r.norm();
        if length > h || length <= GUARD_FACTOR * h {
            return V2::zeros();
        }
        let factor = -3. * length / (2. * h * h * h) + 2. / (h * h) - h / (2. * length * length * length);
        r * (Self::scale(h) * factor)
    }

    fn laplacian(&self, r: V2, h: FT) -> FT {
        let length = r.norm();
        if length > h {
            return 0.;
        }
        40. / (PI * h.powi(5)) * (h - length)
    }
}

/**
 * Cubic spline kernel where the support radius `h` is twice the smoothing length.
 */
pub struct CubicSpline;

impl CubicSpline {
    fn scale(h: FT) -> FT {
        let smoothing_length = 0.5 * h;
        10. / (7. * PI * (smoothing_length * smoothing_length))
    }
}

impl SmoothingKernel for CubicSpline {
    fn value(&self, r: V2, h: FT) -> FT {
        Self::scale(h) * cubic_kernel_unnormalized(r.norm() / h)
    }

    fn gradient(&self, r: V2, h: FT) -> V2 {
        let length = r.norm();
        let q = length / h;
        if q <= GUARD_FACTOR || q >= 1. {
            return V2::zeros();
        }
        r * (Self::scale(h) * cubic_kernel_unnormalized_deriv(q) / (h * length))
    }

    fn laplacian(&self, r: V2, h: FT) -> FT {
        let q = r.norm() / h;
        if q >= 1. {
            return 0.;
        }
        // f'' + f'/r for the radial profile; k'(q)/q stays finite at q=0
        let deriv_by_q = if q < 0.5 { 18. * q - 12. } else { -6. * (1. - q) * (1. - q) / q };
        Self::scale(h) / (h * h) * (cubic_kernel_unnormalized_second_deriv(q) + deriv_by_q)
    }
}

pub fn cubic_kernel_unnormalized(q: FT) -> FT {
    if q < 0.5 {
        return 6. * (q * q * q - q * q) + 1.;
    } else if q < 1. {
        let v = 1. - q;
        return 2. * (v * v * v);
    } else {
        return 0.;
    }
}

pub fn cubic_kernel_unnormalized_deriv(q: FT) -> FT {
    if q < 0.5 {
        return 18. * q * q - 12. * q;
    } else if q < 1. {
        let v = 1. - q;
        return -6. * v * v;
    } else {
        return 0.;
    };
}

pub fn cubic_kernel_unnormalized_second_deriv(q: FT) -> FT {
    if q < 0.5 {
        36. * q - 12.
    } else if q < 1. {
        12. * (1. - q)
    } else {
        0.
    }
}

#[cfg(test)]
fn sample_grid(support_radius: FT, grid_size: usize, mut f: impl FnMut(V2)) {
    use crate::vec2f;

    let probe_offset = 2. * support_radius / grid_size as FT;
    for y in 0..grid_size {
        for x in 0..grid_size {
            f(vec2f(
                (x as FT + 0.5) * probe_offset - support_radius,
                (y as FT + 0.5) * probe_offset - support_radius,
            ));
        }
    }
}

#[test]
fn kernel_2d_integration_test() {
    let h: FT = 2.;
    let grid_size = 400;
    let square_len = 2. * h / grid_size as FT;
    let square_area = (square_len * square_len) as f64;

    for kernel in [KernelType::Poly6, KernelType::Spiky, KernelType::CubicSpline] {
        let mut integral: f64 = 0.;
        sample_grid(h, grid_size, |p| {
            integral += kernel.value(p, h) as f64 * square_area;
        });

        println!("Integration of 2D {} kernel with h={:.2}: {}", kernel.as_str_lowercase(), h, integral);
        assert!((integral - 1.).abs() < 2e-3, "{} integrates to {}", kernel.as_str_lowercase(), integral);
    }
}

#[test]
fn kernel_2d_gradient_test() {
    use crate::vec2f;

    let h: FT = 1.;
    let diff = h * 1e-2;
    let diff_half = diff * 0.5;

    for kernel in ALL_KERNEL_TYPES {
        let mut max_gradient: FT = 0.;
        sample_grid(h * 1.2, 60, |p| max_gradient = max_gradient.max(kernel.gradient(p, h).norm()));

        sample_grid(h * 1.2, 60, |probe_point| {
            if probe_point.norm() < 0.2 * h {
                return;
            }
            let analytical = kernel.gradient(probe_point, h);

            let x_neg = kernel.value(probe_point + vec2f(-diff_half, 0.), h);
            let x_pos = kernel.value(probe_point + vec2f(diff_half, 0.), h);
            let y_neg = kernel.value(probe_point + vec2f(0., -diff_half), h);
            let y_pos = kernel.value(probe_point + vec2f(0., diff_half), h);
            let approx = vec2f((x_pos - x_neg) / diff, (y_pos - y_neg) / diff);

            let error = (analytical - approx).norm();
            assert!(
                error < 1e-2 * max_gradient,
                "{} kernel at [{:+.4}, {:+.4}]: analytical={:?} approx={:?}",
                kernel.as_str_lowercase(),
                probe_point.x,
                probe_point.y,
                analytical,
                approx
            );
        });
    }
}

#[test]
fn kernel_2d_laplacian_test() {
    use crate::vec2f;

    let h: FT = 1.;
    let diff = h * 1e-3;
    let diff_half = diff * 0.5;

    // the viscosity laplacian is not the exact one by construction
    for kernel in [KernelType::Poly6, KernelType::Spiky, KernelType::CubicSpline] {
        let mut max_laplacian: FT = 0.;
        sample_grid(h * 1.2, 60, |p| {
            if p.norm() >= 0.2 * h {
                max_laplacian = max_laplacian.max(kernel.laplacian(p, h).abs());
            }
        });

        sample_grid(h * 1.2, 60, |probe_point| {
            if probe_point.norm() < 0.2 * h {
                return;
            }
            let analytical = kernel.laplacian(probe_point, h);

            let dx = kernel.gradient(probe_point + vec2f(diff_half, 0.), h).x
                - kernel.gradient(probe_point + vec2f(-diff_half, 0.), h).x;
            let dy = kernel.gradient(probe_point + vec2f(0., diff_half), h).y
                - kernel.gradient(probe_point + vec2f(0., -diff_half), h).y;
            let approx = (dx + dy) / diff;

            assert!(
                (analytical - approx).abs() < 2e-2 * max_laplacian,
                "{} kernel at [{:+.4}, {:+.4}]: analytical={} approx={}",
                kernel.as_str_lowercase(),
                probe_point.x,
                probe_point.y,
                analytical,
                approx
            );
        });
    }
}

#[test]
fn kernels_vanish_outside_support() {
    use crate::vec2f;

    let h: FT = 0.7;
    for kernel in ALL_KERNEL_TYPES {
        for r in [vec2f(h * 1.0001, 0.), vec2f(0., -1.5 * h), vec2f(h, h), vec2f(-10. * h, 3. * h)] {
            assert_eq!(kernel.value(r, h), 0.);
            assert_eq!(kernel.gradient(r, h), V2::zeros());
            assert_eq!(kernel.laplacian(r, h), 0.);
        }
    }
}

#[test]
fn kernels_are_guarded_for_colocated_particles() {
    let h: FT = 0.3;
    for kernel in ALL_KERNEL_TYPES {
        assert_eq!(kernel.gradient(V2::zeros(), h), V2::zeros());
        assert!(kernel.value(V2::zeros(), h).is_finite());
        assert!(kernel.laplacian(V2::zeros(), h).is_finite());
    }

    assert!(KernelType::Poly6.peak_value(h) > 0.);
    assert!(KernelType::Spiky.peak_value(h) > 0.);
    assert!(KernelType::CubicSpline.peak_value(h) > 0.);
    assert_eq!(KernelType::Viscosity.peak_value(h), 0.);
}
