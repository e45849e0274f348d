//! 贝塞尔插值曲线
//!
//! VMD 曲线以 [0, 127] 的整数控制点存储，端点固定为 (0,0) 与 (127,127)。
//! 求值时归一化到单位正方形，以牛顿法求解 x(t) = x 后计算 y(t)。

use glam::DVec2;

/// 控制点坐标上限
pub const CURVE_MAX: f64 = 127.0;

/// 牛顿迭代上限
const NEWTON_MAX_ITERATIONS: usize = 20;
/// 牛顿迭代收敛阈值
const NEWTON_TOLERANCE: f64 = 1e-15;
/// 分割后判断对角线的阈值
const LINEAR_TOLERANCE: f64 = 1e-6;

// ============================================================================
// 整数曲线
// ============================================================================

/// VMD 插值曲线（整数控制点）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Curve {
    /// 控制点 1 (x, y)
    pub start: [u8; 2],
    /// 控制点 2 (x, y)
    pub end: [u8; 2],
}

impl Curve {
    /// 默认线性曲线
    pub const LINEAR: Curve = Curve {
        start: [20, 20],
        end: [107, 107],
    };

    pub const fn new(x1: u8, y1: u8, x2: u8, y2: u8) -> Self {
        Self {
            start: [x1, y1],
            end: [x2, y2],
        }
    }

    /// 控制点都在对角线上（退化为线性）
    #[inline]
    pub fn is_linear(&self) -> bool {
        self.start[0] == self.start[1] && self.end[0] == self.end[1]
    }

    /// 转换为归一化曲线段
    pub fn segment(&self) -> BezierSegment {
        BezierSegment {
            p1: DVec2::new(self.start[0] as f64, self.start[1] as f64) / CURVE_MAX,
            p2: DVec2::new(self.end[0] as f64, self.end[1] as f64) / CURVE_MAX,
        }
    }
}

impl Default for Curve {
    fn default() -> Self {
        Self::LINEAR
    }
}

// ============================================================================
// 归一化曲线段
// ============================================================================

/// 单位正方形内的三次贝塞尔曲线段，端点为 (0,0) 和 (1,1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BezierSegment {
    pub p1: DVec2,
    pub p2: DVec2,
}

impl BezierSegment {
    pub const LINEAR: BezierSegment = BezierSegment {
        p1: DVec2::new(20.0 / CURVE_MAX, 20.0 / CURVE_MAX),
        p2: DVec2::new(107.0 / CURVE_MAX, 107.0 / CURVE_MAX),
    };

    pub fn new(p1: DVec2, p2: DVec2) -> Self {
        Self { p1, p2 }
    }

    #[inline]
    pub fn is_linear(&self) -> bool {
        (self.p1.x - self.p1.y).abs() < LINEAR_TOLERANCE
            && (self.p2.x - self.p2.y).abs() < LINEAR_TOLERANCE
    }

    /// x(t)
    #[inline]
    pub fn x_at(&self, t: f64) -> f64 {
        let (a, b, c) = Self::coefficients(self.p1.x, self.p2.x);
        ((a * t + b) * t + c) * t
    }

    /// y(t)
    #[inline]
    pub fn y_at(&self, t: f64) -> f64 {
        let s = 1.0 - t;
        3.0 * s * s * t * self.p1.y + 3.0 * s * t * t * self.p2.y + t * t * t
    }

    /// 三次多项式系数（常数项为 0）
    #[inline]
    fn coefficients(c1: f64, c2: f64) -> (f64, f64, f64) {
        (3.0 * c1 - 3.0 * c2 + 1.0, -6.0 * c1 + 3.0 * c2, 3.0 * c1)
    }

    /// 求解 x(t) = x
    ///
    /// 牛顿法配合二分区间保护，迭代次数有上限；病态曲线返回近似解。
    pub fn solve_t(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= 1.0 {
            return 1.0;
        }

        let (a, b, c) = Self::coefficients(self.p1.x, self.p2.x);
        let mut t = x;
        let mut lo = 0.0;
        let mut hi = 1.0;

        for _ in 0..NEWTON_MAX_ITERATIONS {
            let f = ((a * t + b) * t + c) * t - x;
            if f.abs() < NEWTON_TOLERANCE {
                break;
            }
            if f > 0.0 {
                hi = t;
            } else {
                lo = t;
            }

            let df = (3.0 * a * t + 2.0 * b) * t + c;
            let next = if df.abs() < 1e-15 { t - f } else { t - f / df };
            t = if next > lo && next < hi {
                next
            } else {
                (lo + hi) * 0.5
            };
        }

        t.clamp(0.0, 1.0)
    }

    /// 给定 x 返回 (y, t)
    pub fn sample(&self, x: f64) -> (f64, f64) {
        if self.is_linear() {
            return (x, x);
        }
        let t = self.solve_t(x);
        (self.y_at(t), t)
    }

    /// De Casteljau 分割，左右两段各自重新归一化到单位正方形
    pub fn split(&self, t: f64) -> (BezierSegment, BezierSegment) {
        let a = DVec2::ZERO;
        let b = self.p1;
        let c = self.p2;
        let d = DVec2::ONE;

        let e = a.lerp(b, t);
        let f = b.lerp(c, t);
        let g = c.lerp(d, t);
        let h = e.lerp(f, t);
        let i = f.lerp(g, t);
        let j = h.lerp(i, t);

        (
            Self::normalized(a, e, h, j),
            Self::normalized(j, i, g, d),
        )
    }

    fn normalized(begin: DVec2, p1: DVec2, p2: DVec2, finish: DVec2) -> BezierSegment {
        let size = finish - begin;
        let norm = |p: DVec2| {
            DVec2::new(
                if size.x.abs() > f64::EPSILON { (p.x - begin.x) / size.x } else { 0.0 },
                if size.y.abs() > f64::EPSILON { (p.y - begin.y) / size.y } else { 0.0 },
            )
        };
        BezierSegment {
            p1: norm(p1),
            p2: norm(p2),
        }
    }

    /// 量化为整数曲线（对角线段输出默认线性曲线）
    pub fn to_curve(&self) -> Curve {
        if self.is_linear() {
            return Curve::LINEAR;
        }
        let q = |v: f64| (v.clamp(0.0, 1.0) * CURVE_MAX).round() as u8;
        Curve::new(q(self.p1.x), q(self.p1.y), q(self.p2.x), q(self.p2.y))
    }
}

// ============================================================================
// 插值原语
// ============================================================================

/// 求插值进度 `(x, y, t)`
///
/// `x = (now - start) / (end - start)`，`y` 为曲线在 `x` 处的值，`t` 为曲线参数。
pub fn evaluate(curve: &Curve, start: f64, now: f64, end: f64) -> (f64, f64, f64) {
    let span = end - start;
    if span == 0.0 || now - start == 0.0 {
        return (0.0, 0.0, 0.0);
    }

    let x = (now - start) / span;
    if x >= 1.0 {
        return (1.0, 1.0, 1.0);
    }
    if x <= 0.0 {
        return (x, 0.0, 0.0);
    }
    if curve.is_linear() {
        return (x, x, x);
    }

    let (y, t) = curve.segment().sample(x);
    (x, y, t)
}

/// 在 `now` 处分割曲线，返回 (左半, 右半)
pub fn split_curve(curve: &Curve, start: f64, now: f64, end: f64) -> (Curve, Curve) {
    if curve.is_linear() || end <= start || now <= start {
        return (Curve::LINEAR, *curve);
    }
    if now >= end {
        return (*curve, Curve::LINEAR);
    }

    let (_, _, t) = evaluate(curve, start, now, end);
    let (left, right) = curve.segment().split(t);
    (left.to_curve(), right.to_curve())
}
