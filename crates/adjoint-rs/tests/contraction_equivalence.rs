//! Property test: the contraction rewrite must not change gradients.
//!
//! Random pointwise DAGs are replayed onto two tapes, one with
//! contraction enabled and one without; the leaf gradients have to agree
//! up to floating-point associativity.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use adjoint_rs::{NodeId, Tape, TapeValue, Vector};

const LEAVES: usize = 4;
const OPS: usize = 60;

#[derive(Clone, Copy)]
enum Op {
    One(usize, f32),
    Two(usize, usize, f32, f32),
    Three(usize, usize, usize, f32, f32, f32),
}

fn random_program(rng: &mut StdRng) -> Vec<Op> {
    let mut count = LEAVES;
    let mut program = Vec::with_capacity(OPS);
    for _ in 0..OPS {
        let pick = |rng: &mut StdRng| rng.gen_range(0..count);
        // |w| < 1 keeps even the deepest path products finite in f32
        let weight = |rng: &mut StdRng| rng.gen_range(-0.9f32..0.9);
        let op = match rng.gen_range(0..3) {
            0 => Op::One(pick(rng), weight(rng)),
            1 => Op::Two(pick(rng), pick(rng), weight(rng), weight(rng)),
            _ => Op::Three(
                pick(rng),
                pick(rng),
                pick(rng),
                weight(rng),
                weight(rng),
                weight(rng),
            ),
        };
        program.push(op);
        count += 1;
    }
    program
}

/// Replays `program` onto a fresh tape and returns the leaf gradients
/// after seeding the final node with 1.
fn leaf_gradients(program: &[Op], contract_edges: bool) -> Result<(Vec<f32>, u32)> {
    let mut tape: Tape<Vector> = Tape::new();
    tape.set_log_level(0);
    tape.set_contract_edges(contract_edges);

    let mut nodes: Vec<NodeId> = (0..LEAVES).map(|_| tape.append_leaf(1)).collect();
    for op in program {
        let node = match *op {
            Op::One(a, w) => tape.append("op", 1, nodes[a], Vector::from_scalar(w))?,
            Op::Two(a, b, wa, wb) => tape.append2(
                "op",
                1,
                nodes[a],
                nodes[b],
                Vector::from_scalar(wa),
                Vector::from_scalar(wb),
            )?,
            Op::Three(a, b, c, wa, wb, wc) => tape.append3(
                "op",
                1,
                nodes[a],
                nodes[b],
                nodes[c],
                Vector::from_scalar(wa),
                Vector::from_scalar(wb),
                Vector::from_scalar(wc),
            )?,
        };
        nodes.push(node);
    }

    let output = *nodes.last().expect("program is never empty");
    tape.set_gradient(output, Vector::from_scalar(1.0))?;
    tape.backward(false)?;

    let grads = nodes[..LEAVES]
        .iter()
        .map(|&leaf| Ok(tape.gradient(leaf)?.data()[0]))
        .collect::<Result<Vec<f32>>>()?;
    Ok((grads, tape.stats().edge_contractions))
}

fn assert_close(a: f32, b: f32, context: &str) {
    let scale = a.abs().max(b.abs()).max(1.0);
    assert!(
        (a - b).abs() <= 1e-3 * scale,
        "{context}: {a} vs {b} (scale {scale})"
    );
}

#[test]
fn contraction_does_not_change_gradients() -> Result<()> {
    let mut contractions_seen = 0;
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let program = random_program(&mut rng);

        let (with, contractions) = leaf_gradients(&program, true)?;
        let (without, _) = leaf_gradients(&program, false)?;
        contractions_seen += contractions;

        for (leaf, (a, b)) in with.iter().zip(without.iter()).enumerate() {
            assert_close(*a, *b, &format!("seed {seed}, leaf {leaf}"));
        }
    }
    assert!(
        contractions_seen > 0,
        "the random programs never exercised the rewrite"
    );
    Ok(())
}

#[test]
fn contraction_equivalence_holds_for_deep_chains() -> Result<()> {
    // a pure chain is the worst case for the rewrite: every append folds
    // the whole path into one edge
    let mut rng = StdRng::seed_from_u64(99);
    let weights: Vec<f32> = (0..40).map(|_| rng.gen_range(-1.5f32..1.5)).collect();

    let mut results = Vec::new();
    for contract in [true, false] {
        let mut tape: Tape<Vector> = Tape::new();
        tape.set_log_level(0);
        tape.set_contract_edges(contract);

        let x = tape.append_leaf(1);
        let mut head = x;
        for &w in &weights {
            head = tape.append("scale", 1, head, Vector::from_scalar(w))?;
        }
        tape.set_gradient(head, Vector::from_scalar(1.0))?;
        tape.backward(false)?;
        results.push(tape.gradient(x)?.data()[0]);
    }
    assert_close(results[0], results[1], "chain gradient");
    Ok(())
}
