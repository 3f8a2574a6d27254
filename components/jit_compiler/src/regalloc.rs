//! Chaitin-style graph-coloring register allocation.
//!
//! The pipeline: spill the fixed argument pseudo-registers into fresh
//! virtuals, compute per-block liveness to fixpoint, build the
//! interference graph (recording coalescing hints for moves), then color
//! by recursive simplification. When coloring reports spills, the color
//! limit grows toward the architectural register count first; once it is
//! exhausted, spill code is inserted and the graph rebuilt. The loop must
//! converge within 32 rounds.

use crate::arch;
use crate::bitset::BitSet;
use crate::ir::{MBlock, MInsn, MMem, MProcedure, MReg, Operand, RegClass};

/// Scale applied to every node's use count when computing its priority.
const HOT_BIAS: f32 = 12.0;

/// Extra weight per reference from a load or store, penalizing the spill
/// of memory-touching values.
const MEM_WEIGHT: usize = 100;

/// Hard cap on color/spill rounds; exceeding it is a broken invariant.
const MAX_ROUNDS: usize = 32;

/// One interference-graph node, indexed by register uid.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Adjacency bitset over uids; contains the node's own bit while the
    /// node is present in the graph.
    pub adj: BitSet,
    /// Spill-choice weight: `(uses + 1) * HOT_BIAS`, memory-weighted.
    pub priority: f32,
    /// Coalescing hint ring: uids of move partners, newest overwriting
    /// oldest.
    pub hints: [u32; 4],
    hint_id: u8,
    /// Assigned color, 1-based; 0 while uncolored or spilled.
    pub color: u8,
    /// True for FP-class nodes.
    pub is_fp: bool,
    /// True when the uid names an allocatable register observed in the
    /// procedure.
    pub is_reg: bool,
    /// Assigned spill slot, 1-based; 0 when not spilled.
    pub spill_slot: i32,
}

impl GraphNode {
    fn new(len: usize) -> GraphNode {
        GraphNode {
            adj: BitSet::new(len),
            priority: 0.0,
            hints: [u32::MAX; 4],
            hint_id: 0,
            color: 0,
            is_fp: false,
            is_reg: false,
            spill_slot: 0,
        }
    }

    fn add_hint(&mut self, uid: usize) {
        self.hints[self.hint_id as usize % self.hints.len()] = uid as u32;
        self.hint_id = self.hint_id.wrapping_add(1);
    }
}

/// Replace the fixed argument pseudo-registers (VM pointer, top-of-stack,
/// argument count) with fresh virtuals and prepend moves from the
/// platform's argument registers at procedure entry.
fn spill_args(proc: &mut MProcedure) {
    let mut replacements: [Option<MReg>; 3] = [None; 3];
    let mut next_virt = proc.next_virt;
    for bb in &mut proc.blocks {
        for insn in &mut bb.instructions {
            insn.for_each_reg_mut(|r, _| {
                let slot = match *r {
                    MReg::VmPtr => 0,
                    MReg::Tos => 1,
                    MReg::NArgs => 2,
                    _ => return,
                };
                let fresh = *replacements[slot].get_or_insert_with(|| {
                    let v = MReg::Virt(next_virt, RegClass::Gp);
                    next_virt += 1;
                    v
                });
                *r = fresh;
            });
        }
    }
    proc.next_virt = next_virt;

    let mut prologue = Vec::new();
    for (i, replacement) in replacements.iter().enumerate() {
        if let Some(dst) = replacement {
            let src = arch::map_argument(i, 0, false);
            debug_assert!(src != 0, "argument register out of range");
            prologue.push(MInsn::mov(*dst, MReg::Phys(src)));
        }
    }
    if !prologue.is_empty() {
        debug_assert!(!proc.blocks.is_empty());
        let entry = &mut proc.blocks[0].instructions;
        prologue.append(entry);
        *entry = prologue;
    }
}

/// Compute `def`/`ref` per block and solve the backward dataflow
///   `in(n) = (out(n) \ def(n)) U ref(n)`,
///   `out(n) = U in(s)` over successors,
/// to fixpoint. Returns the uid bound all bitsets are sized to.
pub fn compute_liveness(proc: &mut MProcedure) -> usize {
    let mut max_uid = 0;
    for bb in &proc.blocks {
        for insn in &bb.instructions {
            insn.for_each_reg(|r, _| max_uid = max_uid.max(r.uid()));
        }
    }
    let len = (max_uid + 1).max(proc.uid_limit());

    for bb in &mut proc.blocks {
        let MBlock {
            instructions,
            def,
            refs,
            in_live,
            out_live,
            ..
        } = bb;
        *def = BitSet::new(len);
        *refs = BitSet::new(len);
        *in_live = BitSet::new(len);
        *out_live = BitSet::new(len);
        for insn in instructions.iter() {
            insn.for_each_reg(|r, is_read| {
                if r.is_pseudo() {
                    return;
                }
                if is_read {
                    if !def.get(r.uid()) {
                        refs.set(r.uid());
                    }
                } else {
                    def.set(r.uid());
                }
            });
        }
    }

    let successors: Vec<Vec<usize>> = proc
        .blocks
        .iter()
        .map(|b| b.successors.iter().map(|&u| u as usize).collect())
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for bi in 0..proc.blocks.len() {
            let mut new_live = BitSet::new(len);
            for &s in &successors[bi] {
                new_live.union_with(&proc.blocks[s].in_live);
            }
            new_live.subtract(&proc.blocks[bi].def);
            new_live.union_with(&proc.blocks[bi].refs);
            if new_live != proc.blocks[bi].in_live {
                changed = true;
                proc.blocks[bi].in_live = new_live;
            }
        }
    }

    for bi in 0..proc.blocks.len() {
        let mut out = BitSet::new(len);
        for &s in &successors[bi] {
            out.union_with(&proc.blocks[s].in_live);
        }
        proc.blocks[bi].out_live = out;
    }
    len
}

/// Build the interference graph: recompute liveness, then walk every
/// block's instructions in reverse maintaining a live set, adding edges
/// between same-class allocatable registers and recording coalescing
/// hints at register-to-register moves.
pub fn build_graph(proc: &mut MProcedure) -> Vec<GraphNode> {
    let len = compute_liveness(proc);

    let mut use_count = vec![0usize; len];
    let mut seen: Vec<Option<MReg>> = vec![None; len];
    for bb in &proc.blocks {
        for insn in &bb.instructions {
            let memory = insn.op.is_memory();
            insn.for_each_reg(|r, is_read| {
                let uid = r.uid();
                seen[uid] = Some(r);
                if is_read {
                    use_count[uid] += 1;
                }
                if memory {
                    use_count[uid] += MEM_WEIGHT;
                }
            });
        }
    }

    let mut graph: Vec<GraphNode> = (0..len).map(|_| GraphNode::new(len)).collect();
    for (uid, slot) in seen.iter().enumerate() {
        let Some(r) = slot else { continue };
        if r.is_pseudo() {
            continue;
        }
        let node = &mut graph[uid];
        node.is_reg = true;
        node.adj.set(uid);
        node.priority = (use_count[uid] + 1) as f32 * HOT_BIAS;
        node.is_fp = r.is_fp();
        if let MReg::Phys(p) = r {
            node.color = p.unsigned_abs() as u8;
        }
    }

    for bi in 0..proc.blocks.len() {
        let mut live = proc.blocks[bi].out_live.clone();
        for insn in proc.blocks[bi].instructions.iter().rev() {
            if insn.op.is_move() {
                if let (Some(out), Some(Operand::Reg(src))) = (insn.out, insn.args.first()) {
                    if !out.is_pseudo() && !src.is_pseudo() {
                        let (a, b) = (src.uid(), out.uid());
                        graph[a].add_hint(b);
                        graph[b].add_hint(a);
                    }
                }
            }

            if let Some(out) = insn.out {
                if !out.is_pseudo() {
                    live.reset(out.uid());
                    add_edges(&mut graph, out.uid(), &live);
                }
            }
            insn.for_each_reg(|r, is_read| {
                if is_read && !r.is_pseudo() {
                    live.set(r.uid());
                }
            });
            insn.for_each_reg(|r, is_read| {
                if is_read && !r.is_pseudo() {
                    add_edges(&mut graph, r.uid(), &live);
                }
            });
        }
    }
    graph
}

/// Connect one register to everything live alongside it. Edges only join
/// allocatable registers of the same class.
fn add_edges(graph: &mut [GraphNode], uid: usize, live: &BitSet) {
    if !graph[uid].is_reg {
        return;
    }
    let is_fp = graph[uid].is_fp;
    for other in live.iter_ones() {
        if other == uid || !graph[other].is_reg || graph[other].is_fp != is_fp {
            continue;
        }
        graph[uid].adj.set(other);
        graph[other].adj.set(uid);
    }
}

/// Try coloring with `k` GP and `m` FP colors by recursive
/// simplification. Returns how many registers of each class failed to get
/// a color and were assigned spill slots instead.
pub fn try_color(graph: &mut [GraphNode], k: usize, m: usize) -> (usize, usize) {
    // Pick an uncolored node with degree below its class limit; failing
    // that, the cheapest over-limit node becomes the spill candidate and
    // simplification continues with it.
    let mut candidate: Option<usize> = None;
    let mut pick: Option<usize> = None;
    for (i, node) in graph.iter().enumerate() {
        if node.color != 0 {
            continue;
        }
        let present = node.adj.popcount();
        if present == 0 {
            continue;
        }
        let degree = present - 1;
        let limit = if node.is_fp { m } else { k };
        if degree >= limit {
            let replace = match candidate {
                Some(c) => graph[c].priority > node.priority,
                None => true,
            };
            if replace {
                candidate = Some(i);
            }
        } else {
            pick = Some(i);
            break;
        }
    }

    let it = match pick.or(candidate) {
        Some(i) => i,
        None => return (0, 0),
    };

    // Remove the node, saving its adjacency.
    let saved = std::mem::take(&mut graph[it].adj);
    for j in saved.iter_ones() {
        if j != it {
            graph[j].adj.reset(it);
        }
    }

    let (mut spill_gp, mut spill_fp) = try_color(graph, k, m);

    // Reinsert and mask out the colors its neighbors took.
    let mut color_mask: u64 = !0;
    for j in saved.iter_ones() {
        if j != it {
            graph[j].adj.set(it);
            if graph[j].color != 0 {
                color_mask &= !(1u64 << (graph[j].color - 1));
            }
        }
    }
    graph[it].adj = saved;

    // A fitting coalescing hint wins over the lowest free color.
    let hints = graph[it].hints;
    for hint in hints {
        if hint == u32::MAX {
            continue;
        }
        let hint_color = graph[hint as usize].color;
        if hint_color != 0 && color_mask & (1u64 << (hint_color - 1)) != 0 {
            graph[it].color = hint_color;
            return (spill_gp, spill_fp);
        }
    }

    let lowest = color_mask.trailing_zeros() as usize;
    let limit = if graph[it].is_fp { m } else { k };
    if lowest >= limit {
        if graph[it].is_fp {
            spill_fp += 1;
        } else {
            spill_gp += 1;
        }

        // Lowest positive slot not conflicting with a neighbor's slot.
        graph[it].color = 0;
        graph[it].spill_slot = 1;
        loop {
            let mut changed = false;
            for j in 0..graph.len() {
                if j != it && graph[j].spill_slot == graph[it].spill_slot && graph[j].adj.get(it) {
                    graph[it].spill_slot += 1;
                    changed = true;
                    break;
                }
            }
            if !changed {
                break;
            }
        }
    } else {
        graph[it].color = (lowest + 1) as u8;
    }
    (spill_gp, spill_fp)
}

/// Allocate with the full architectural register file.
pub fn allocate_registers(proc: &mut MProcedure) {
    allocate_registers_limited(proc, arch::NUM_GP, arch::NUM_FP);
}

/// Allocate with at most `max_k` GP and `max_m` FP colors. The public
/// entry point for tests and constrained targets; `allocate_registers`
/// passes the architectural counts.
pub fn allocate_registers_limited(proc: &mut MProcedure, max_k: usize, max_m: usize) {
    spill_args(proc);

    let mut graph = build_graph(proc);
    let mut graph_copy = graph.clone();

    let mut k = max_k.min(arch::GP_VOLATILE.len().max(2));
    let mut m = max_m.min(arch::FP_VOLATILE.len().max(2));
    let mut num_spill_slots: i32 = 0;

    let mut round = 0;
    loop {
        assert!(round < MAX_ROUNDS, "register allocation failed to converge");
        round += 1;

        let (spill_gp, spill_fp) = try_color(&mut graph, k, m);
        log::debug!(
            "regalloc: round {} K={} M={} spills=({}, {})",
            round,
            k,
            m,
            spill_gp,
            spill_fp
        );
        if spill_gp == 0 && spill_fp == 0 {
            break;
        }

        // Prefer widening the color limit to inserting spill code.
        let grow_k = spill_gp > 0 && k != max_k;
        let grow_m = spill_fp > 0 && m != max_m;
        if grow_k || grow_m {
            if grow_k {
                k += 1;
            }
            if grow_m {
                m += 1;
            }
            graph = graph_copy.clone();
            continue;
        }

        insert_spill_code(proc, &graph, &mut num_spill_slots);
        graph = build_graph(proc);
        graph_copy = graph.clone();
    }

    proc.used_stack_length = (((num_spill_slots + 1) & !1) * 8) as u32;

    rewrite_registers(proc, &graph);
    erase_self_moves(proc);
}

/// Emit reloads before uses and stores after definitions of every spilled
/// virtual. Within one instruction a spilled virtual is reloaded at most
/// once; the rewrites are cached per instruction.
fn insert_spill_code(proc: &mut MProcedure, graph: &[GraphNode], num_spill_slots: &mut i32) {
    let slot_offset = *num_spill_slots;
    let mut next_virt = proc.next_virt;

    for bb in &mut proc.blocks {
        let mut idx = 0;
        while idx < bb.instructions.len() {
            // (spilled reg, replacement, slot)
            let mut reloads: Vec<(MReg, MReg, i32)> = Vec::new();
            let mut stores: Vec<(MReg, MReg, i32)> = Vec::new();

            bb.instructions[idx].for_each_reg_mut(|r, is_read| {
                if !matches!(*r, MReg::Virt(..)) {
                    return;
                }
                let uid = r.uid();
                if uid >= graph.len() {
                    return; // a temp introduced earlier in this pass
                }
                let info = &graph[uid];
                if info.spill_slot == 0 {
                    return;
                }
                let slot = info.spill_slot + slot_offset - 1;
                *num_spill_slots = (*num_spill_slots).max(slot + 1);
                if is_read {
                    if let Some(&(_, fresh, _)) = reloads.iter().find(|(src, _, _)| *src == *r) {
                        *r = fresh;
                        return;
                    }
                    let fresh = fresh_virt(&mut next_virt, r.is_fp());
                    reloads.push((*r, fresh, slot));
                    *r = fresh;
                } else {
                    let fresh = fresh_virt(&mut next_virt, r.is_fp());
                    stores.push((*r, fresh, slot));
                    *r = fresh;
                }
            });

            if reloads.is_empty() && stores.is_empty() {
                idx += 1;
                continue;
            }

            let reload_count = reloads.len();
            for (i, (_, fresh, slot)) in reloads.into_iter().enumerate() {
                let mem = MMem {
                    base: MReg::Sp,
                    disp: slot * 8,
                };
                bb.instructions.insert(idx + i, MInsn::load(fresh, mem));
            }
            let insn_pos = idx + reload_count;
            let store_count = stores.len();
            for (i, (_, fresh, slot)) in stores.into_iter().enumerate() {
                let mem = MMem {
                    base: MReg::Sp,
                    disp: slot * 8,
                };
                bb.instructions
                    .insert(insn_pos + 1 + i, MInsn::store(mem, fresh));
            }
            idx = insn_pos + 1 + store_count;
        }
    }
    proc.next_virt = next_virt;
}

fn fresh_virt(next_virt: &mut u32, fp: bool) -> MReg {
    let id = *next_virt;
    *next_virt += 1;
    MReg::Virt(id, if fp { RegClass::Fp } else { RegClass::Gp })
}

/// Swap every virtual register for its assigned physical register (FP
/// colors negate in the internal encoding) and record the used-register
/// masks for prolog/epilog emission.
fn rewrite_registers(proc: &mut MProcedure, graph: &[GraphNode]) {
    let MProcedure {
        blocks,
        used_gp_mask,
        used_fp_mask,
        ..
    } = proc;
    for bb in blocks {
        for insn in &mut bb.instructions {
            insn.for_each_reg_mut(|r, _| {
                if !matches!(*r, MReg::Virt(..)) {
                    return;
                }
                let node = &graph[r.uid()];
                let color = node.color as i32;
                assert!(color != 0, "uncolored virtual register");
                if node.is_fp {
                    *used_fp_mask |= 1u64 << (color - 1);
                    *r = MReg::Phys(-color);
                } else {
                    *used_gp_mask |= 1u64 << (color - 1);
                    *r = MReg::Phys(color);
                }
            });
        }
    }
}

/// Coalescing made some moves redundant; drop every `mov r, r`.
fn erase_self_moves(proc: &mut MProcedure) {
    for bb in &mut proc.blocks {
        bb.instructions.retain(|insn| {
            if insn.op.is_move() {
                if let (Some(out), Some(Operand::Reg(src))) = (insn.out, insn.args.first()) {
                    return out != *src;
                }
            }
            true
        });
    }
}
