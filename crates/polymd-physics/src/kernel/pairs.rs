//! The pair-interaction loop bodies and the per-cell-pair driver.
//!
//! All six interaction cross-terms run in a single pass over the second
//! cell's padded site arrays. A molecular cutoff decides once per molecule
//! pair whether all its site pairs interact; the decision is stored as a
//! bit mask in the second cell's distance-lookup arrays so the site loops
//! vectorize without reevaluating it. Newton's third law: every force
//! computed for an i-site is subtracted from the partner sites in the
//! second cell.
//!
//! Masked-off lanes carry a cleared bit pattern; the reciprocal of r^2 is
//! masked before the square root so no NaN ever propagates, and padding
//! lanes stay at exact zero by the SoA invariant.

use polymd_core::component::ComponentTable;

use crate::simd::{mask_value, SimdReal};
use crate::soa::{CellSoA, SIMD_WIDTH};

/// Scalar macroscopic accumulators of one traversal.
#[derive(Debug, Default, Clone, Copy)]
pub struct MacroSums {
    /// Six times the Lennard-Jones potential.
    pub upot6lj: f64,
    /// Electrostatic (charge/dipole/quadrupole) potential.
    pub upot_xpoles: f64,
    pub virial: f64,
    /// Reaction-field self term.
    pub my_rf: f64,
}

impl MacroSums {
    pub fn reset(&mut self) {
        *self = MacroSums::default();
    }
}

/// Vector-register accumulators, folded into [`MacroSums`] once per
/// cell-pair call.
struct VSums<V: SimdReal> {
    upot6lj: V,
    upot_xpoles: V,
    virial: V,
    my_rf: V,
}

impl<V: SimdReal> VSums<V> {
    fn new() -> Self {
        Self {
            upot6lj: V::zero(),
            upot_xpoles: V::zero(),
            virial: V::zero(),
            my_rf: V::zero(),
        }
    }

    fn fold_into(self, sums: &mut MacroSums) {
        sums.upot6lj += self.upot6lj.hsum();
        sums.upot_xpoles += self.upot_xpoles.hsum();
        sums.virial += self.virial.hsum();
        sums.my_rf -= self.my_rf.hsum();
    }
}

/// Reusable buffers for one first-cell molecule: site data copied out so
/// the second cell can be borrowed mutably, plus per-site output
/// accumulators applied back after the site loops.
#[derive(Debug, Default)]
pub struct Scratch {
    pos: [f64; 3],
    lj_r: Vec<[f64; 3]>,
    lj_id: Vec<usize>,
    lj_f: Vec<[f64; 3]>,
    ch_r: Vec<[f64; 3]>,
    ch_q: Vec<f64>,
    ch_f: Vec<[f64; 3]>,
    di_r: Vec<[f64; 3]>,
    di_e: Vec<[f64; 3]>,
    di_p: Vec<f64>,
    di_f: Vec<[f64; 3]>,
    di_trq: Vec<[f64; 3]>,
    qu_r: Vec<[f64; 3]>,
    qu_e: Vec<[f64; 3]>,
    qu_m: Vec<f64>,
    qu_f: Vec<[f64; 3]>,
    qu_trq: Vec<[f64; 3]>,
}

impl Scratch {
    fn load(&mut self, soa: &CellSoA, i: usize) {
        self.pos = soa.mol_pos.get(i);

        self.lj_r.clear();
        self.lj_id.clear();
        self.lj_f.clear();
        for s in soa.lj_range(i) {
            self.lj_r.push(soa.ljc_r.get(s));
            self.lj_id.push(soa.ljc_id[s]);
            self.lj_f.push([0.0; 3]);
        }

        self.ch_r.clear();
        self.ch_q.clear();
        self.ch_f.clear();
        for s in soa.charge_range(i) {
            self.ch_r.push(soa.charges_r.get(s));
            self.ch_q.push(soa.charges_q[s]);
            self.ch_f.push([0.0; 3]);
        }

        self.di_r.clear();
        self.di_e.clear();
        self.di_p.clear();
        self.di_f.clear();
        self.di_trq.clear();
        for s in soa.dipole_range(i) {
            self.di_r.push(soa.dipoles_r.get(s));
            self.di_e.push(soa.dipoles_e.get(s));
            self.di_p.push(soa.dipoles_p[s]);
            self.di_f.push([0.0; 3]);
            self.di_trq.push([0.0; 3]);
        }

        self.qu_r.clear();
        self.qu_e.clear();
        self.qu_m.clear();
        self.qu_f.clear();
        self.qu_trq.clear();
        for s in soa.quad_range(i) {
            self.qu_r.push(soa.quads_r.get(s));
            self.qu_e.push(soa.quads_e.get(s));
            self.qu_m.push(soa.quads_m[s]);
            self.qu_f.push([0.0; 3]);
            self.qu_trq.push([0.0; 3]);
        }
    }

    fn apply(&self, soa: &mut CellSoA, i: usize) {
        for (k, s) in soa.lj_range(i).enumerate() {
            add_site(&mut soa.ljc_f, s, self.lj_f[k]);
        }
        for (k, s) in soa.charge_range(i).enumerate() {
            add_site(&mut soa.charges_f, s, self.ch_f[k]);
        }
        for (k, s) in soa.dipole_range(i).enumerate() {
            add_site(&mut soa.dipoles_f, s, self.di_f[k]);
            add_site(&mut soa.dipoles_trq, s, self.di_trq[k]);
        }
        for (k, s) in soa.quad_range(i).enumerate() {
            add_site(&mut soa.quads_f, s, self.qu_f[k]);
            add_site(&mut soa.quads_trq, s, self.qu_trq[k]);
        }
    }
}

#[inline]
fn add_site(f: &mut crate::soa::Field3, s: usize, v: [f64; 3]) {
    f.x[s] += v[0];
    f.y[s] += v[1];
    f.z[s] += v[2];
}

/// Per-class any-interaction flags for the current first-cell molecule.
#[derive(Debug, Clone, Copy, Default)]
struct AnyHit {
    lj: bool,
    charge: bool,
    dipole: bool,
    quad: bool,
}

/// Site-loop start indices (floored to the SIMD width).
#[derive(Debug, Clone, Copy, Default)]
struct Starts {
    lj: usize,
    charge: usize,
    dipole: usize,
    quad: usize,
}

#[inline]
fn floor_w(x: usize) -> usize {
    x / SIMD_WIDTH * SIMD_WIDTH
}

/// Evaluate the molecular cutoff against every second-cell molecule and
/// store the result per site in the lookup arrays. `same_cell_i` excludes
/// molecules up to and including i (and coincident centres) so each
/// unordered pair inside a cell is computed once.
fn compute_masks(soa2: &mut CellSoA, pos: [f64; 3], same_cell_i: Option<usize>, cutoff2: f64) -> AnyHit {
    let mut any = AnyHit::default();
    for jm in 0..soa2.mol_num {
        let mp = soa2.mol_pos.get(jm);
        let dx = pos[0] - mp[0];
        let dy = pos[1] - mp[1];
        let dz = pos[2] - mp[2];
        let m_r2 = dx * dx + dy * dy + dz * dz;
        let cond = m_r2 < cutoff2
            && match same_cell_i {
                Some(i) => jm > i && m_r2 != 0.0,
                None => true,
            };
        let val = mask_value(cond);
        for s in soa2.lj_range(jm) {
            soa2.ljc_dist_lookup[s] = val;
            any.lj |= cond;
        }
        for s in soa2.charge_range(jm) {
            soa2.charges_dist_lookup[s] = val;
            any.charge |= cond;
        }
        for s in soa2.dipole_range(jm) {
            soa2.dipoles_dist_lookup[s] = val;
            any.dipole |= cond;
        }
        for s in soa2.quad_range(jm) {
            soa2.quads_dist_lookup[s] = val;
            any.quad |= cond;
        }
    }
    any
}

// ---------------------------------------------------------------------
// Small vector helpers
// ---------------------------------------------------------------------

#[inline]
fn splat3<V: SimdReal>(v: [f64; 3]) -> [V; 3] {
    [V::splat(v[0]), V::splat(v[1]), V::splat(v[2])]
}

#[inline]
fn load3<V: SimdReal>(f: &crate::soa::Field3, j: usize) -> [V; 3] {
    [V::load(&f.x, j), V::load(&f.y, j), V::load(&f.z, j)]
}

#[inline]
fn sub3<V: SimdReal>(a: &[V; 3], b: &[V; 3]) -> [V; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot3<V: SimdReal>(a: &[V; 3], b: &[V; 3]) -> V {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Newton 3: subtract the computed force from the partner sites.
#[inline]
fn store_sub3<V: SimdReal>(f: &mut crate::soa::Field3, j: usize, v: &[V; 3]) {
    (V::load(&f.x, j) - v[0]).write(&mut f.x, j);
    (V::load(&f.y, j) - v[1]).write(&mut f.y, j);
    (V::load(&f.z, j) - v[2]).write(&mut f.z, j);
}

#[inline]
fn store_add3<V: SimdReal>(f: &mut crate::soa::Field3, j: usize, v: &[V; 3]) {
    (V::load(&f.x, j) + v[0]).write(&mut f.x, j);
    (V::load(&f.y, j) + v[1]).write(&mut f.y, j);
    (V::load(&f.z, j) + v[2]).write(&mut f.z, j);
}

#[inline]
fn acc3<V: SimdReal>(acc: &mut [V; 3], v: &[V; 3]) {
    acc[0] = acc[0] + v[0];
    acc[1] = acc[1] + v[1];
    acc[2] = acc[2] + v[2];
}

#[inline]
fn hsum3_into<V: SimdReal>(acc: &mut [f64; 3], v: &[V; 3]) {
    acc[0] += v[0].hsum();
    acc[1] += v[1].hsum();
    acc[2] += v[2].hsum();
}

#[inline]
fn hsum3_sub<V: SimdReal>(acc: &mut [f64; 3], v: &[V; 3]) {
    acc[0] -= v[0].hsum();
    acc[1] -= v[1].hsum();
    acc[2] -= v[2].hsum();
}

/// Gather the resolved pair parameters for one i-site type against a
/// chunk of j-site types.
#[inline]
fn gather_lj<V: SimdReal>(table: &ComponentTable, id1: usize, ids: &[usize], j: usize) -> (V, V, V) {
    let eps24 = V::from_lanes(|l| table.pair(id1, ids[j + l]).eps24);
    let sig2 = V::from_lanes(|l| table.pair(id1, ids[j + l]).sig2);
    let shift6 = V::from_lanes(|l| table.pair(id1, ids[j + l]).shift6);
    (eps24, sig2, shift6)
}

// ---------------------------------------------------------------------
// Loop bodies (one per interaction term)
// ---------------------------------------------------------------------

/// LJ 12-6 with optional shift. Returns the force on site 1.
#[inline]
#[allow(clippy::too_many_arguments)]
fn lj_body<V: SimdReal, const MACRO: bool>(
    m1: &[V; 3],
    r1: &[V; 3],
    m2: &[V; 3],
    r2: &[V; 3],
    mask: V,
    eps24: V,
    sig2: V,
    shift6: V,
    sums: &mut VSums<V>,
) -> [V; 3] {
    let d = sub3(r1, r2);
    let r2c = dot3(&d, &d);
    let r2_inv = (V::splat(1.0) / r2c).and(mask);

    let lj2 = sig2 * r2_inv;
    let lj4 = lj2 * lj2;
    let lj6 = lj4 * lj2;
    let lj12 = lj6 * lj6;
    let lj12m6 = lj12 - lj6;

    let scale = eps24 * r2_inv * (lj12 + lj12m6);
    let f = [d[0] * scale, d[1] * scale, d[2] * scale];

    if MACRO {
        // shift6 is not masked, so the shifted potential must be.
        let upot = eps24.mul_add(lj12m6, shift6).and(mask);
        sums.upot6lj = sums.upot6lj + upot;
        let m_d = sub3(m1, m2);
        sums.virial = sums.virial + dot3(&m_d, &f);
    }
    f
}

/// Coulomb charge-charge. Returns the force on site 1.
#[inline]
#[allow(clippy::too_many_arguments)]
fn charge_charge_body<V: SimdReal, const MACRO: bool>(
    m1: &[V; 3],
    r1: &[V; 3],
    q1: V,
    m2: &[V; 3],
    r2: &[V; 3],
    q2: V,
    mask: V,
    sums: &mut VSums<V>,
) -> [V; 3] {
    let d = sub3(r1, r2);
    let dr2 = dot3(&d, &d);
    let dr2_inv = (V::splat(1.0) / dr2).and(mask);
    let dr_inv = dr2_inv.sqrt();

    let q1q2 = q1 * q2;
    let upot = q1q2 * dr_inv;
    let fac = upot * dr2_inv;
    let f = [d[0] * fac, d[1] * fac, d[2] * fac];

    if MACRO {
        sums.upot_xpoles = sums.upot_xpoles + upot;
        let m_d = sub3(m1, m2);
        sums.virial = sums.virial + dot3(&m_d, &f);
    }
    f
}

/// Charge (site 1) against dipole (site 2). Returns the force on the
/// charge and the torque on the dipole.
#[inline]
#[allow(clippy::too_many_arguments)]
fn charge_dipole_body<V: SimdReal, const MACRO: bool>(
    m1: &[V; 3],
    r1: &[V; 3],
    q: V,
    m2: &[V; 3],
    r2: &[V; 3],
    e: &[V; 3],
    p: V,
    mask: V,
    sums: &mut VSums<V>,
) -> ([V; 3], [V; 3]) {
    let d = sub3(r1, r2);
    let dr2 = dot3(&d, &d);
    let dr2_inv = (V::splat(1.0) / dr2).and(mask);
    let dr_inv = dr2_inv.sqrt();
    let dr3_inv = dr2_inv * dr_inv;

    let re = dot3(&d, e);
    let qp = q * p;
    let qpdr3 = qp * dr3_inv;
    let fac = dr2_inv * V::splat(3.0) * re;

    let f = [
        qpdr3 * d[0].nmul_add(fac, e[0]),
        qpdr3 * d[1].nmul_add(fac, e[1]),
        qpdr3 * d[2].nmul_add(fac, e[2]),
    ];

    if MACRO {
        let minus_upot = qpdr3 * re;
        sums.upot_xpoles = sums.upot_xpoles - minus_upot;
        let m_d = sub3(m1, m2);
        sums.virial = sums.virial + dot3(&m_d, &f);
    }

    // Torque on the dipole: qp/r^3 * (e x d).
    let trq = [
        qpdr3 * e[1].mul_add(d[2], -(e[2] * d[1])),
        qpdr3 * e[2].mul_add(d[0], -(e[0] * d[2])),
        qpdr3 * e[0].mul_add(d[1], -(e[1] * d[0])),
    ];
    (f, trq)
}

/// Dipole-dipole with reaction-field correction. Returns the force on
/// site 1 and the torques on both sites.
#[inline]
#[allow(clippy::too_many_arguments)]
fn dipole_dipole_body<V: SimdReal, const MACRO: bool>(
    m1: &[V; 3],
    r1: &[V; 3],
    e1: &[V; 3],
    p1: V,
    m2: &[V; 3],
    r2: &[V; 3],
    e2: &[V; 3],
    p2: V,
    mask: V,
    eps_rf_inv_rc3: V,
    sums: &mut VSums<V>,
) -> ([V; 3], [V; 3], [V; 3]) {
    let three = V::splat(3.0);
    let five = V::splat(5.0);

    let d = sub3(r1, r2);
    let dr2 = dot3(&d, &d);
    let dr2_inv = (V::splat(1.0) / dr2).and(mask);
    let dr_inv = dr2_inv.sqrt();
    let dr2three_inv = three * dr2_inv;

    let p1p2 = (p1 * p2).and(mask);
    let rffac = p1p2 * eps_rf_inv_rc3;
    let p1p2r3 = p1p2 * dr_inv * dr2_inv;
    let p1p2threer5 = p1p2r3 * dr2three_inv;

    let e1e2 = dot3(e1, e2);
    let re1 = dot3(&d, e1);
    let re2 = dot3(&d, e2);

    let re1threeperr2 = re1 * dr2three_inv;
    let re2threeperr2 = re2 * dr2three_inv;
    let re1re2perr2 = dr2_inv * re1 * re2;
    let e1e2minus5re1re2perr2 = five.nmul_add(re1re2perr2, e1e2);

    let f = [
        p1p2threer5 * (d[0] * e1e2minus5re1re2perr2 + e1[0] * re2 + e2[0] * re1),
        p1p2threer5 * (d[1] * e1e2minus5re1re2perr2 + e1[1] * re2 + e2[1] * re1),
        p1p2threer5 * (d[2] * e1e2minus5re1re2perr2 + e1[2] * re2 + e2[2] * re1),
    ];

    if MACRO {
        let upot = p1p2r3 * three.nmul_add(re1re2perr2, e1e2);
        sums.upot_xpoles = sums.upot_xpoles + upot;
        let m_d = sub3(m1, m2);
        sums.virial = sums.virial + dot3(&m_d, &f);
        sums.my_rf = rffac.mul_add(e1e2, sums.my_rf);
    }

    // e1 x e2, component by component.
    let c_x = e1[1].mul_add(e2[2], -(e1[2] * e2[1]));
    let c_y = e1[2].mul_add(e2[0], -(e1[0] * e2[2]));
    let c_z = e1[0].mul_add(e2[1], -(e1[1] * e2[0]));

    let e1xd = [
        e1[1].mul_add(d[2], -(e1[2] * d[1])),
        e1[2].mul_add(d[0], -(e1[0] * d[2])),
        e1[0].mul_add(d[1], -(e1[1] * d[0])),
    ];
    let e2xd = [
        e2[1].mul_add(d[2], -(e2[2] * d[1])),
        e2[2].mul_add(d[0], -(e2[0] * d[2])),
        e2[0].mul_add(d[1], -(e2[1] * d[0])),
    ];

    let m1t = [
        p1p2r3.mul_add(re2threeperr2.mul_add(e1xd[0], -c_x), rffac * c_x),
        p1p2r3.mul_add(re2threeperr2.mul_add(e1xd[1], -c_y), rffac * c_y),
        p1p2r3.mul_add(re2threeperr2.mul_add(e1xd[2], -c_z), rffac * c_z),
    ];
    let m2t = [
        p1p2r3.mul_add(re1threeperr2.mul_add(e2xd[0], c_x), -(rffac * c_x)),
        p1p2r3.mul_add(re1threeperr2.mul_add(e2xd[1], c_y), -(rffac * c_y)),
        p1p2r3.mul_add(re1threeperr2.mul_add(e2xd[2], c_z), -(rffac * c_z)),
    ];
    (f, m1t, m2t)
}

/// Charge (site 1) against linear quadrupole (site 2). Returns the force
/// on the charge and the torque on the quadrupole.
#[inline]
#[allow(clippy::too_many_arguments)]
fn charge_quadrupole_body<V: SimdReal, const MACRO: bool>(
    m1: &[V; 3],
    r1: &[V; 3],
    q: V,
    m2: &[V; 3],
    r2: &[V; 3],
    e: &[V; 3],
    mq: V,
    mask: V,
    sums: &mut VSums<V>,
) -> ([V; 3], [V; 3]) {
    let one = V::splat(1.0);
    let three = V::splat(3.0);

    let d = sub3(r1, r2);
    let dr2 = dot3(&d, &d);
    let invdr2 = (one / dr2).and(mask);
    let invdr = invdr2.sqrt();

    let q_q05 = V::splat(0.5) * q * mq;
    let costj = dot3(e, &d) * invdr;

    let q_qinv4dr3 = q_q05 * invdr * invdr2;
    let upot = q_qinv4dr3 * (three * costj * costj - one);

    let minus_partial_rij_invdr = three * upot * invdr2;
    let partial_tj_invdr = V::splat(6.0) * costj * q_qinv4dr3 * invdr;
    let fac = (costj * partial_tj_invdr).mul_add(invdr, minus_partial_rij_invdr);

    let f = [
        fac.mul_add(d[0], -(partial_tj_invdr * e[0])),
        fac.mul_add(d[1], -(partial_tj_invdr * e[1])),
        fac.mul_add(d[2], -(partial_tj_invdr * e[2])),
    ];

    if MACRO {
        sums.upot_xpoles = sums.upot_xpoles + upot;
        let m_d = sub3(m1, m2);
        sums.virial = sums.virial + dot3(&m_d, &f);
    }

    // -(e x d), the torque lever of the oriented site.
    let minus_e_x_d = [
        e[2].mul_add(d[1], -(e[1] * d[2])),
        e[0].mul_add(d[2], -(e[2] * d[0])),
        e[1].mul_add(d[0], -(e[0] * d[1])),
    ];
    let trq = [
        partial_tj_invdr * minus_e_x_d[0],
        partial_tj_invdr * minus_e_x_d[1],
        partial_tj_invdr * minus_e_x_d[2],
    ];
    (f, trq)
}

/// Dipole (site 1) against quadrupole (site 2). Returns the force on the
/// dipole and both torques.
#[inline]
#[allow(clippy::too_many_arguments)]
fn dipole_quadrupole_body<V: SimdReal, const MACRO: bool>(
    m1: &[V; 3],
    r1: &[V; 3],
    e1: &[V; 3],
    p: V,
    m2: &[V; 3],
    r2: &[V; 3],
    e2: &[V; 3],
    mq: V,
    mask: V,
    sums: &mut VSums<V>,
) -> ([V; 3], [V; 3], [V; 3]) {
    let one = V::splat(1.0);
    let two = V::splat(2.0);
    let five = V::splat(5.0);

    let d = sub3(r1, r2);
    let dr2 = dot3(&d, &d);
    let invdr2 = (one / dr2).and(mask);
    let invdr = invdr2.sqrt();

    let myqfac = V::splat(1.5) * p * mq * invdr2 * invdr2;

    let costi = dot3(e1, &d) * invdr;
    let costj = dot3(e2, &d) * invdr;
    let cos2tj = costj * costj;
    let cosgij = dot3(e1, e2);

    let five_cos2tj_minus1 = five.mul_add(cos2tj, -one);
    let two_costj = two * costj;

    let part1 = costi * five_cos2tj_minus1;
    let part2 = two_costj * cosgij;
    let upot = myqfac * (part2 - part1);

    let myqfac_invdr = myqfac * invdr;
    let minus_partial_rij_invdr = V::splat(4.0) * upot * invdr2;
    let minus_partial_ti_invdr = myqfac_invdr * five_cos2tj_minus1;
    let part1b = five.mul_add(costi * costj, -cosgij);
    let minus_partial_tj_invdr = myqfac_invdr * two * part1b;
    let partial_gij = myqfac * two_costj;

    let part3 = costi.mul_add(minus_partial_ti_invdr, costj * minus_partial_tj_invdr);
    let fac = part3.nmul_add(invdr, minus_partial_rij_invdr);

    let f = [
        fac * d[0] + minus_partial_ti_invdr * e1[0] + minus_partial_tj_invdr * e2[0],
        fac * d[1] + minus_partial_ti_invdr * e1[1] + minus_partial_tj_invdr * e2[1],
        fac * d[2] + minus_partial_ti_invdr * e1[2] + minus_partial_tj_invdr * e2[2],
    ];

    if MACRO {
        sums.upot_xpoles = sums.upot_xpoles + upot;
        let m_d = sub3(m1, m2);
        sums.virial = sums.virial + dot3(&m_d, &f);
    }

    let (m1t, m2t) = oriented_pair_torques::<V>(
        &d,
        e1,
        e2,
        minus_partial_ti_invdr,
        minus_partial_tj_invdr,
        partial_gij,
    );
    (f, m1t, m2t)
}

/// Quadrupole-quadrupole. Returns the force on site 1 and both torques.
#[inline]
#[allow(clippy::too_many_arguments)]
fn quadrupole_body<V: SimdReal, const MACRO: bool>(
    m1: &[V; 3],
    r1: &[V; 3],
    e1: &[V; 3],
    mq1: V,
    m2: &[V; 3],
    r2: &[V; 3],
    e2: &[V; 3],
    mq2: V,
    mask: V,
    sums: &mut VSums<V>,
) -> ([V; 3], [V; 3], [V; 3]) {
    let one = V::splat(1.0);
    let two = V::splat(2.0);
    let three = V::splat(3.0);
    let five = V::splat(5.0);

    let d = sub3(r1, r2);
    let dr2 = dot3(&d, &d);
    let invdr2 = (one / dr2).and(mask);
    let invdr = invdr2.sqrt();

    let qfac = V::splat(0.75) * invdr * (mq1 * mq2) * (invdr2 * invdr2);

    let costi = dot3(e1, &d) * invdr;
    let costj = dot3(e2, &d) * invdr;
    let cos2ti = costi * costi;
    let cos2tj = costj * costj;
    let cosgij = dot3(e1, e2);

    let term = cosgij - five * (costi * costj);

    let part2 = V::splat(15.0) * cos2ti * cos2tj;
    let part3 = two * term * term;
    let upot_inner = five.mul_add(cos2ti + cos2tj, part2);
    let upot = qfac * ((one + part3) - upot_inner);

    let minus_partial_rij_invdr = five * upot * invdr2;
    let part1 = qfac * V::splat(10.0) * invdr;
    let two_term = two * term;

    let part3i = three * costi * cos2tj;
    let part4i = costi + two_term.mul_add(costj, part3i);
    let minus_partial_ti_invdr = part1 * part4i;

    let part3j = three * costj * cos2ti;
    let part4j = costj + two_term.mul_add(costi, part3j);
    let minus_partial_tj_invdr = part1 * part4j;

    let partial_gij = qfac * V::splat(4.0) * term;

    let fac = (minus_partial_ti_invdr * costi + minus_partial_tj_invdr * costj)
        .nmul_add(invdr, minus_partial_rij_invdr);

    let f = [
        fac * d[0] + minus_partial_ti_invdr * e1[0] + minus_partial_tj_invdr * e2[0],
        fac * d[1] + minus_partial_ti_invdr * e1[1] + minus_partial_tj_invdr * e2[1],
        fac * d[2] + minus_partial_ti_invdr * e1[2] + minus_partial_tj_invdr * e2[2],
    ];

    if MACRO {
        sums.upot_xpoles = sums.upot_xpoles + upot;
        let m_d = sub3(m1, m2);
        sums.virial = sums.virial + dot3(&m_d, &f);
    }

    let (m1t, m2t) = oriented_pair_torques::<V>(
        &d,
        e1,
        e2,
        minus_partial_ti_invdr,
        minus_partial_tj_invdr,
        partial_gij,
    );
    (f, m1t, m2t)
}

/// Shared torque tail of the oriented-oriented bodies: both cross
/// products are asymmetric, so two torque vectors come out.
#[inline]
fn oriented_pair_torques<V: SimdReal>(
    d: &[V; 3],
    e1: &[V; 3],
    e2: &[V; 3],
    minus_partial_ti_invdr: V,
    minus_partial_tj_invdr: V,
    partial_gij: V,
) -> ([V; 3], [V; 3]) {
    let c_x = e1[1].mul_add(e2[2], -(e1[2] * e2[1]));
    let c_y = e1[2].mul_add(e2[0], -(e1[0] * e2[2]));
    let c_z = e1[0].mul_add(e2[1], -(e1[1] * e2[0]));

    let pg = [partial_gij * c_x, partial_gij * c_y, partial_gij * c_z];

    let e1xd = [
        e1[1].mul_add(d[2], -(e1[2] * d[1])),
        e1[2].mul_add(d[0], -(e1[0] * d[2])),
        e1[0].mul_add(d[1], -(e1[1] * d[0])),
    ];
    let m1t = [
        minus_partial_ti_invdr.mul_add(e1xd[0], -pg[0]),
        minus_partial_ti_invdr.mul_add(e1xd[1], -pg[1]),
        minus_partial_ti_invdr.mul_add(e1xd[2], -pg[2]),
    ];

    let e2xd = [
        e2[1].mul_add(d[2], -(e2[2] * d[1])),
        e2[2].mul_add(d[0], -(e2[0] * d[2])),
        e2[0].mul_add(d[1], -(e2[1] * d[0])),
    ];
    let m2t = [
        minus_partial_tj_invdr.mul_add(e2xd[0], pg[0]),
        minus_partial_tj_invdr.mul_add(e2xd[1], pg[1]),
        minus_partial_tj_invdr.mul_add(e2xd[2], pg[2]),
    ];
    (m1t, m2t)
}

// ---------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------

/// Self-interactions inside one cell.
pub fn calculate_cell<V: SimdReal, const MACRO: bool>(
    soa: &mut CellSoA,
    table: &ComponentTable,
    cutoff2: f64,
    eps_rf_inv_rc3: f64,
    sums: &mut MacroSums,
    scratch: &mut Scratch,
) {
    if soa.mol_num < 2 {
        return;
    }
    let mut vsums = VSums::<V>::new();
    for i in 0..soa.mol_num {
        scratch.load(soa, i);
        let any = compute_masks(soa, scratch.pos, Some(i), cutoff2);
        let starts = Starts {
            lj: floor_w(soa.mol_lj_start[i]),
            charge: floor_w(soa.mol_charge_start[i]),
            dipole: floor_w(soa.mol_dipole_start[i]),
            quad: floor_w(soa.mol_quad_start[i]),
        };
        interact_molecule::<V, MACRO>(scratch, soa, any, starts, table, eps_rf_inv_rc3, &mut vsums);
        scratch.apply(soa, i);
    }
    vsums.fold_into(sums);
}

/// Cross-interactions between two distinct cells.
pub fn calculate_cell_pair<V: SimdReal, const MACRO: bool>(
    soa1: &mut CellSoA,
    soa2: &mut CellSoA,
    table: &ComponentTable,
    cutoff2: f64,
    eps_rf_inv_rc3: f64,
    sums: &mut MacroSums,
    scratch: &mut Scratch,
) {
    if soa1.mol_num == 0 || soa2.mol_num == 0 {
        return;
    }
    let mut vsums = VSums::<V>::new();
    for i in 0..soa1.mol_num {
        scratch.load(soa1, i);
        let any = compute_masks(soa2, scratch.pos, None, cutoff2);
        interact_molecule::<V, MACRO>(
            scratch,
            soa2,
            any,
            Starts::default(),
            table,
            eps_rf_inv_rc3,
            &mut vsums,
        );
        scratch.apply(soa1, i);
    }
    vsums.fold_into(sums);
}

/// All nine class combinations for one first-cell molecule against the
/// masked second cell.
#[allow(clippy::needless_range_loop)]
fn interact_molecule<V: SimdReal, const MACRO: bool>(
    scratch: &mut Scratch,
    soa2: &mut CellSoA,
    any: AnyHit,
    starts: Starts,
    table: &ComponentTable,
    eps_rf_inv_rc3: f64,
    vsums: &mut VSums<V>,
) {
    let m1 = splat3::<V>(scratch.pos);
    let eps_rf = V::splat(eps_rf_inv_rc3);

    // Lennard-Jones.
    if any.lj {
        let end = soa2.ljc_dist_lookup.len();
        for k in 0..scratch.lj_r.len() {
            let r1 = splat3::<V>(scratch.lj_r[k]);
            let id1 = scratch.lj_id[k];
            let mut sum_f = [V::zero(); 3];
            let mut j = starts.lj;
            while j < end {
                let mask = V::load(&soa2.ljc_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.ljc_r, j);
                    let m2 = load3::<V>(&soa2.ljc_m_r, j);
                    let (eps24, sig2, shift6) = gather_lj::<V>(table, id1, &soa2.ljc_id, j);
                    let f = lj_body::<V, MACRO>(&m1, &r1, &m2, &r2, mask, eps24, sig2, shift6, vsums);
                    store_sub3(&mut soa2.ljc_f, j, &f);
                    acc3(&mut sum_f, &f);
                }
                j += V::WIDTH;
            }
            hsum3_into(&mut scratch.lj_f[k], &sum_f);
        }
    }

    // Interactions with the second cell's charges.
    if any.charge {
        let end = soa2.charges_dist_lookup.len();

        // charge - charge
        for k in 0..scratch.ch_r.len() {
            let r1 = splat3::<V>(scratch.ch_r[k]);
            let q1 = V::splat(scratch.ch_q[k]);
            let mut sum_f = [V::zero(); 3];
            let mut j = starts.charge;
            while j < end {
                let mask = V::load(&soa2.charges_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.charges_r, j);
                    let m2 = load3::<V>(&soa2.charges_m_r, j);
                    let q2 = V::load(&soa2.charges_q, j);
                    let f = charge_charge_body::<V, MACRO>(&m1, &r1, q1, &m2, &r2, q2, mask, vsums);
                    store_sub3(&mut soa2.charges_f, j, &f);
                    acc3(&mut sum_f, &f);
                }
                j += V::WIDTH;
            }
            hsum3_into(&mut scratch.ch_f[k], &sum_f);
        }

        // dipole - charge: the body computes the force on the charge,
        // so the dipole side accumulates the negation.
        for k in 0..scratch.di_r.len() {
            let r1 = splat3::<V>(scratch.di_r[k]);
            let e1 = splat3::<V>(scratch.di_e[k]);
            let p1 = V::splat(scratch.di_p[k]);
            let mut sum_f = [V::zero(); 3];
            let mut sum_m = [V::zero(); 3];
            let mut j = starts.charge;
            while j < end {
                let mask = V::load(&soa2.charges_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.charges_r, j);
                    let m2 = load3::<V>(&soa2.charges_m_r, j);
                    let q2 = V::load(&soa2.charges_q, j);
                    let (f, trq) = charge_dipole_body::<V, MACRO>(
                        &m2, &r2, q2, &m1, &r1, &e1, p1, mask, vsums,
                    );
                    store_add3(&mut soa2.charges_f, j, &f);
                    acc3(&mut sum_f, &f);
                    acc3(&mut sum_m, &trq);
                }
                j += V::WIDTH;
            }
            hsum3_sub(&mut scratch.di_f[k], &sum_f);
            hsum3_into(&mut scratch.di_trq[k], &sum_m);
        }

        // quadrupole - charge, same pattern.
        for k in 0..scratch.qu_r.len() {
            let r1 = splat3::<V>(scratch.qu_r[k]);
            let e1 = splat3::<V>(scratch.qu_e[k]);
            let mq1 = V::splat(scratch.qu_m[k]);
            let mut sum_f = [V::zero(); 3];
            let mut sum_m = [V::zero(); 3];
            let mut j = starts.charge;
            while j < end {
                let mask = V::load(&soa2.charges_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.charges_r, j);
                    let m2 = load3::<V>(&soa2.charges_m_r, j);
                    let q2 = V::load(&soa2.charges_q, j);
                    let (f, trq) = charge_quadrupole_body::<V, MACRO>(
                        &m2, &r2, q2, &m1, &r1, &e1, mq1, mask, vsums,
                    );
                    store_add3(&mut soa2.charges_f, j, &f);
                    acc3(&mut sum_f, &f);
                    acc3(&mut sum_m, &trq);
                }
                j += V::WIDTH;
            }
            hsum3_sub(&mut scratch.qu_f[k], &sum_f);
            hsum3_into(&mut scratch.qu_trq[k], &sum_m);
        }
    }

    // Interactions with the second cell's dipoles.
    if any.dipole {
        let end = soa2.dipoles_dist_lookup.len();

        // dipole - dipole
        for k in 0..scratch.di_r.len() {
            let r1 = splat3::<V>(scratch.di_r[k]);
            let e1 = splat3::<V>(scratch.di_e[k]);
            let p1 = V::splat(scratch.di_p[k]);
            let mut sum_f = [V::zero(); 3];
            let mut sum_m = [V::zero(); 3];
            let mut j = starts.dipole;
            while j < end {
                let mask = V::load(&soa2.dipoles_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.dipoles_r, j);
                    let m2 = load3::<V>(&soa2.dipoles_m_r, j);
                    let e2 = load3::<V>(&soa2.dipoles_e, j);
                    let p2 = V::load(&soa2.dipoles_p, j);
                    let (f, m1t, m2t) = dipole_dipole_body::<V, MACRO>(
                        &m1, &r1, &e1, p1, &m2, &r2, &e2, p2, mask, eps_rf, vsums,
                    );
                    store_sub3(&mut soa2.dipoles_f, j, &f);
                    store_add3(&mut soa2.dipoles_trq, j, &m2t);
                    acc3(&mut sum_f, &f);
                    acc3(&mut sum_m, &m1t);
                }
                j += V::WIDTH;
            }
            hsum3_into(&mut scratch.di_f[k], &sum_f);
            hsum3_into(&mut scratch.di_trq[k], &sum_m);
        }

        // charge - dipole
        for k in 0..scratch.ch_r.len() {
            let r1 = splat3::<V>(scratch.ch_r[k]);
            let q1 = V::splat(scratch.ch_q[k]);
            let mut sum_f = [V::zero(); 3];
            let mut j = starts.dipole;
            while j < end {
                let mask = V::load(&soa2.dipoles_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.dipoles_r, j);
                    let m2 = load3::<V>(&soa2.dipoles_m_r, j);
                    let e2 = load3::<V>(&soa2.dipoles_e, j);
                    let p2 = V::load(&soa2.dipoles_p, j);
                    let (f, trq) = charge_dipole_body::<V, MACRO>(
                        &m1, &r1, q1, &m2, &r2, &e2, p2, mask, vsums,
                    );
                    store_sub3(&mut soa2.dipoles_f, j, &f);
                    store_add3(&mut soa2.dipoles_trq, j, &trq);
                    acc3(&mut sum_f, &f);
                }
                j += V::WIDTH;
            }
            hsum3_into(&mut scratch.ch_f[k], &sum_f);
        }

        // quadrupole - dipole: the body computes the force on the dipole.
        for k in 0..scratch.qu_r.len() {
            let r1 = splat3::<V>(scratch.qu_r[k]);
            let e1 = splat3::<V>(scratch.qu_e[k]);
            let mq1 = V::splat(scratch.qu_m[k]);
            let mut sum_f = [V::zero(); 3];
            let mut sum_m = [V::zero(); 3];
            let mut j = starts.dipole;
            while j < end {
                let mask = V::load(&soa2.dipoles_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.dipoles_r, j);
                    let m2 = load3::<V>(&soa2.dipoles_m_r, j);
                    let e2 = load3::<V>(&soa2.dipoles_e, j);
                    let p2 = V::load(&soa2.dipoles_p, j);
                    let (f, m_di, m_qu) = dipole_quadrupole_body::<V, MACRO>(
                        &m2, &r2, &e2, p2, &m1, &r1, &e1, mq1, mask, vsums,
                    );
                    store_add3(&mut soa2.dipoles_f, j, &f);
                    store_add3(&mut soa2.dipoles_trq, j, &m_di);
                    acc3(&mut sum_f, &f);
                    acc3(&mut sum_m, &m_qu);
                }
                j += V::WIDTH;
            }
            hsum3_sub(&mut scratch.qu_f[k], &sum_f);
            hsum3_into(&mut scratch.qu_trq[k], &sum_m);
        }
    }

    // Interactions with the second cell's quadrupoles.
    if any.quad {
        let end = soa2.quads_dist_lookup.len();

        // quadrupole - quadrupole
        for k in 0..scratch.qu_r.len() {
            let r1 = splat3::<V>(scratch.qu_r[k]);
            let e1 = splat3::<V>(scratch.qu_e[k]);
            let mq1 = V::splat(scratch.qu_m[k]);
            let mut sum_f = [V::zero(); 3];
            let mut sum_m = [V::zero(); 3];
            let mut j = starts.quad;
            while j < end {
                let mask = V::load(&soa2.quads_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.quads_r, j);
                    let m2 = load3::<V>(&soa2.quads_m_r, j);
                    let e2 = load3::<V>(&soa2.quads_e, j);
                    let mq2 = V::load(&soa2.quads_m, j);
                    let (f, m1t, m2t) = quadrupole_body::<V, MACRO>(
                        &m1, &r1, &e1, mq1, &m2, &r2, &e2, mq2, mask, vsums,
                    );
                    store_sub3(&mut soa2.quads_f, j, &f);
                    store_add3(&mut soa2.quads_trq, j, &m2t);
                    acc3(&mut sum_f, &f);
                    acc3(&mut sum_m, &m1t);
                }
                j += V::WIDTH;
            }
            hsum3_into(&mut scratch.qu_f[k], &sum_f);
            hsum3_into(&mut scratch.qu_trq[k], &sum_m);
        }

        // charge - quadrupole
        for k in 0..scratch.ch_r.len() {
            let r1 = splat3::<V>(scratch.ch_r[k]);
            let q1 = V::splat(scratch.ch_q[k]);
            let mut sum_f = [V::zero(); 3];
            let mut j = starts.quad;
            while j < end {
                let mask = V::load(&soa2.quads_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.quads_r, j);
                    let m2 = load3::<V>(&soa2.quads_m_r, j);
                    let e2 = load3::<V>(&soa2.quads_e, j);
                    let mq2 = V::load(&soa2.quads_m, j);
                    let (f, trq) = charge_quadrupole_body::<V, MACRO>(
                        &m1, &r1, q1, &m2, &r2, &e2, mq2, mask, vsums,
                    );
                    store_sub3(&mut soa2.quads_f, j, &f);
                    store_add3(&mut soa2.quads_trq, j, &trq);
                    acc3(&mut sum_f, &f);
                }
                j += V::WIDTH;
            }
            hsum3_into(&mut scratch.ch_f[k], &sum_f);
        }

        // dipole - quadrupole
        for k in 0..scratch.di_r.len() {
            let r1 = splat3::<V>(scratch.di_r[k]);
            let e1 = splat3::<V>(scratch.di_e[k]);
            let p1 = V::splat(scratch.di_p[k]);
            let mut sum_f = [V::zero(); 3];
            let mut sum_m = [V::zero(); 3];
            let mut j = starts.quad;
            while j < end {
                let mask = V::load(&soa2.quads_dist_lookup, j);
                if mask.any_nonzero() {
                    let r2 = load3::<V>(&soa2.quads_r, j);
                    let m2 = load3::<V>(&soa2.quads_m_r, j);
                    let e2 = load3::<V>(&soa2.quads_e, j);
                    let mq2 = V::load(&soa2.quads_m, j);
                    let (f, m_di, m_qu) = dipole_quadrupole_body::<V, MACRO>(
                        &m1, &r1, &e1, p1, &m2, &r2, &e2, mq2, mask, vsums,
                    );
                    store_sub3(&mut soa2.quads_f, j, &f);
                    store_add3(&mut soa2.quads_trq, j, &m_qu);
                    acc3(&mut sum_f, &f);
                    acc3(&mut sum_m, &m_di);
                }
                j += V::WIDTH;
            }
            hsum3_into(&mut scratch.di_f[k], &sum_f);
            hsum3_into(&mut scratch.di_trq[k], &sum_m);
        }
    }
}
