//! Derivative-free minimization by Powell's conjugate direction method,
//! with golden-section bracketing and Brent line searches.
use std::time::{Duration, Instant};

const TINY: f64 = 1e-25;
const GOLD: f64 = 1.618034;
const GLIMIT: f64 = 100.0;
const CGOLD: f64 = 0.381_966_0;
const ZEPS: f64 = 1e-10;
const BRENT_ITERATIONS: usize = 100;
const BRACKET_STEPS: usize = 50;

/// Something to minimize over a parameter vector. Infeasible points
/// should return a large finite value rather than infinity or NaN.
pub trait Objective {
    fn evaluate(&mut self, params: &[f64]) -> f64;
}

#[derive(Debug, Clone)]
pub struct PowellOptions {
    /// Stop when an iteration improves the value by less than this
    /// fraction.
    pub tolerance: f64,
    /// Fractional precision of each line search.
    pub line_tolerance: f64,
    /// Give up after this many iterations.
    pub max_iterations: usize,
}

impl Default for PowellOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            line_tolerance: 2e-4,
            max_iterations: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeResult {
    /// Lowest value found; the parameters hold the point where it was found.
    pub value: f64,
    /// Powell iterations run.
    pub iterations: usize,
    /// Objective evaluations made.
    pub evaluations: usize,
    pub elapsed: Duration,
}

#[inline]
fn sign(a: f64, b: f64) -> f64 {
    if b >= 0.0 {
        a.abs()
    } else {
        -a.abs()
    }
}

/// Bracket a minimum of `g` starting from `ax` (where `g` is `fa`) and
/// `bx`. Returns (a, b, c, f(b)) with f(b) no greater than f(a) or f(c).
fn bracket<G: FnMut(f64) -> f64>(g: &mut G, ax: f64, fa: f64, bx: f64) -> (f64, f64, f64, f64) {
    let (mut ax, mut bx, mut fa) = (ax, bx, fa);
    let mut fb = g(bx);
    if fb > fa {
        std::mem::swap(&mut ax, &mut bx);
        std::mem::swap(&mut fa, &mut fb);
    }
    let mut cx = bx + GOLD * (bx - ax);
    let mut fc = g(cx);
    let mut steps = 0;
    while fb > fc && steps < BRACKET_STEPS {
        steps += 1;
        let r = (bx - ax) * (fb - fc);
        let q = (bx - cx) * (fb - fa);
        let mut u = bx - ((bx - cx) * q - (bx - ax) * r) / (2.0 * sign((q - r).abs().max(TINY), q - r));
        let ulim = bx + GLIMIT * (cx - bx);
        let mut fu;
        if (bx - u) * (u - cx) > 0.0 {
            // parabolic u between b and c
            fu = g(u);
            if fu < fc {
                return (bx, u, cx, fu);
            } else if fu > fb {
                return (ax, bx, u, fb);
            }
            u = cx + GOLD * (cx - bx);
            fu = g(u);
        } else if (cx - u) * (u - ulim) > 0.0 {
            fu = g(u);
            if fu < fc {
                bx = cx;
                cx = u;
                u = cx + GOLD * (cx - bx);
                fb = fc;
                fc = fu;
                fu = g(u);
            }
        } else if (u - ulim) * (ulim - cx) >= 0.0 {
            u = ulim;
            fu = g(u);
        } else {
            u = cx + GOLD * (cx - bx);
            fu = g(u);
        }
        ax = bx;
        bx = cx;
        cx = u;
        fa = fb;
        fb = fc;
        fc = fu;
    }
    (ax, bx, cx, fb)
}

/// Brent's method on a bracket (a, b, c) with f(b) = `fb`. Returns the
/// abscissa and value of the minimum.
fn brent<G: FnMut(f64) -> f64>(g: &mut G, ax: f64, bx: f64, cx: f64, fb: f64, tol: f64) -> (f64, f64) {
    let (mut a, mut b) = (ax.min(cx), ax.max(cx));
    let (mut x, mut w, mut v) = (bx, bx, bx);
    let (mut fx, mut fw, mut fv) = (fb, fb, fb);
    let (mut d, mut e) = (0.0f64, 0.0f64);
    for _ in 0..BRENT_ITERATIONS {
        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + ZEPS;
        let tol2 = 2.0 * tol1;
        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            break;
        }
        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let etemp = e;
            e = d;
            if !(p.abs() >= (0.5 * q * etemp).abs() || p <= q * (a - x) || p >= q * (b - x)) {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = sign(tol1, xm - x);
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= xm { a - x } else { b - x };
            d = CGOLD * e;
        }
        let u = if d.abs() >= tol1 { x + d } else { x + sign(tol1, d) };
        let fu = g(u);
        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            w = x;
            x = u;
            fv = fw;
            fw = fx;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                w = u;
                fv = fw;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
    (x, fx)
}

/// Minimize `f` from `p` along `xi`, where f(p) = `fp`. Moves `p` to the
/// minimum, scales `xi` to the step taken and returns the new value.
fn line_minimize<F: FnMut(&[f64]) -> f64>(
    f: &mut F,
    p: &mut [f64],
    xi: &mut [f64],
    fp: f64,
    tol: f64,
    evaluations: &mut usize,
) -> f64 {
    let mut point = vec![0.0; p.len()];
    let (xmin, fmin) = {
        let origin: &[f64] = p;
        let dir: &[f64] = xi;
        let mut g = |t: f64| {
            for k in 0..point.len() {
                point[k] = origin[k] + t * dir[k];
            }
            *evaluations += 1;
            f(&point)
        };
        let (ax, bx, cx, fb) = bracket(&mut g, 0.0, fp, 1.0);
        brent(&mut g, ax, bx, cx, fb, tol)
    };
    if fmin > fp {
        // Nothing better along this line.
        xi.iter_mut().for_each(|x| *x = 0.0);
        return fp;
    }
    for (pk, xk) in p.iter_mut().zip(xi.iter_mut()) {
        *xk *= xmin;
        *pk += *xk;
    }
    fmin
}

/// Minimize `f` starting at `params`, leaving `params` at the best point
/// found.
pub fn minimize<F: FnMut(&[f64]) -> f64>(mut f: F, params: &mut [f64], options: &PowellOptions) -> OptimizeResult {
    let start = Instant::now();
    let n = params.len();
    let mut evaluations = 1;
    let mut fret = f(&*params);
    if n == 0 {
        return OptimizeResult {
            value: fret,
            iterations: 0,
            evaluations,
            elapsed: start.elapsed(),
        };
    }
    let mut directions: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    let mut pt = params.to_vec();
    let mut iterations = 0;
    loop {
        iterations += 1;
        let fp = fret;
        let mut ibig = 0;
        let mut del = 0.0;
        for (i, dir) in directions.iter_mut().enumerate() {
            let fptt = fret;
            fret = line_minimize(&mut f, params, dir, fret, options.line_tolerance, &mut evaluations);
            if fptt - fret > del {
                del = fptt - fret;
                ibig = i;
            }
        }
        if 2.0 * (fp - fret) <= options.tolerance * (fp.abs() + fret.abs()) + TINY {
            break;
        }
        if iterations >= options.max_iterations {
            log::warn!("Powell search stopped after {} iterations", iterations);
            break;
        }
        let ptt: Vec<f64> = params.iter().zip(pt.iter()).map(|(&p, &q)| 2.0 * p - q).collect();
        let mut xit: Vec<f64> = params.iter().zip(pt.iter()).map(|(&p, &q)| p - q).collect();
        pt.copy_from_slice(params);
        let fptt = f(&ptt);
        evaluations += 1;
        if fptt < fp {
            let t = 2.0 * (fp - 2.0 * fret + fptt) * (fp - fret - del).powi(2) - del * (fp - fptt).powi(2);
            if t < 0.0 {
                fret = line_minimize(&mut f, params, &mut xit, fret, options.line_tolerance, &mut evaluations);
                directions[ibig] = directions[n - 1].clone();
                directions[n - 1] = xit;
            }
        }
    }
    OptimizeResult {
        value: fret,
        iterations,
        evaluations,
        elapsed: start.elapsed(),
    }
}

/// Minimize an `Objective` with Powell's method.
pub fn optimize<O: Objective + ?Sized>(objective: &mut O, params: &mut [f64], options: &PowellOptions) -> OptimizeResult {
    minimize(|p: &[f64]| objective.evaluate(p), params, options)
}
