//! Einsum executor for [`ArrayD`].
//!
//! Operands are contracted pairwise from left to right. Before each pairwise
//! step, axes that no later operand and not the output mention are summed
//! away; shared labels that are still needed later become batch axes and the
//! rest are contracted, so every step is a batched matrix product.

use std::collections::{HashMap, HashSet};

use ndarray::{Array3, ArrayD, Axis, IxDyn, LinalgScalar};

use crate::error::{Error, Result};

/// An operand together with one label per axis.
struct Term<T> {
    labels: Vec<char>,
    array: ArrayD<T>,
}

pub(super) fn contract<T>(notation: &str, operands: &[&ArrayD<T>]) -> Result<ArrayD<T>>
where
    T: LinalgScalar,
{
    let (inputs, output) = parse(notation, operands.len())?;
    check_sizes(notation, &inputs, &output, operands)?;

    let mut terms = inputs
        .into_iter()
        .zip(operands)
        .map(|(labels, &array)| Term {
            labels,
            array: array.clone(),
        });
    let Some(mut acc) = terms.next() else {
        return Err(invalid(notation, "no operands"));
    };
    let rest: Vec<Term<T>> = terms.collect();

    for (position, next) in rest.iter().enumerate() {
        let keep: HashSet<char> = output
            .iter()
            .chain(rest[position + 1..].iter().flat_map(|term| &term.labels))
            .copied()
            .collect();
        acc = contract_pair(acc, next, &keep)?;
    }

    let acc = sum_out(acc, |label| output.contains(&label));
    let axes: Vec<usize> = output
        .iter()
        .filter_map(|label| acc.labels.iter().position(|other| other == label))
        .collect();

    Ok(acc
        .array
        .permuted_axes(IxDyn(&axes))
        .as_standard_layout()
        .into_owned())
}

fn invalid(notation: &str, reason: impl Into<String>) -> Error {
    Error::Notation {
        notation: notation.to_owned(),
        reason: reason.into(),
    }
}

fn parse_labels(notation: &str, term: &str) -> Result<Vec<char>> {
    let labels: Vec<char> = term.trim().chars().collect();
    if let Some(bad) = labels.iter().find(|label| !label.is_ascii_alphabetic()) {
        return Err(invalid(notation, format!("unexpected character `{bad}`")));
    }
    let unique: HashSet<&char> = labels.iter().collect();
    if unique.len() != labels.len() {
        return Err(invalid(notation, format!("repeated label in `{term}`")));
    }

    Ok(labels)
}

fn parse(notation: &str, count: usize) -> Result<(Vec<Vec<char>>, Vec<char>)> {
    let (inputs, output) = notation
        .split_once("->")
        .ok_or_else(|| invalid(notation, "missing `->`"))?;
    let inputs = inputs
        .split(',')
        .map(|term| parse_labels(notation, term))
        .collect::<Result<Vec<_>>>()?;
    if inputs.len() != count {
        return Err(invalid(
            notation,
            format!("{} terms for {count} operands", inputs.len()),
        ));
    }

    Ok((inputs, parse_labels(notation, output)?))
}

fn check_sizes<T>(
    notation: &str,
    inputs: &[Vec<char>],
    output: &[char],
    operands: &[&ArrayD<T>],
) -> Result<()> {
    let mut sizes: HashMap<char, usize> = HashMap::new();
    for (labels, operand) in inputs.iter().zip(operands) {
        if labels.len() != operand.ndim() {
            return Err(invalid(
                notation,
                format!(
                    "term `{}` has {} labels for a {}-d operand",
                    labels.iter().collect::<String>(),
                    labels.len(),
                    operand.ndim()
                ),
            ));
        }
        for (&label, &len) in labels.iter().zip(operand.shape()) {
            let known = *sizes.entry(label).or_insert(len);
            if known != len {
                return Err(invalid(
                    notation,
                    format!("label `{label}` is bound to {known} and {len}"),
                ));
            }
        }
    }
    if let Some(label) = output.iter().find(|label| !sizes.contains_key(label)) {
        return Err(invalid(
            notation,
            format!("output label `{label}` is not in any input"),
        ));
    }

    Ok(())
}

fn sum_out<T>(term: Term<T>, keep: impl Fn(char) -> bool) -> Term<T>
where
    T: LinalgScalar,
{
    let Term {
        mut labels,
        mut array,
    } = term;
    for axis in (0..labels.len()).rev() {
        if !keep(labels[axis]) {
            array = array.sum_axis(Axis(axis));
            let _removed = labels.remove(axis);
        }
    }

    Term { labels, array }
}

/// Lays `term` out as a `(g0, g1, g2)` array whose axes are the products of
/// the three label groups, in the given order.
fn group<T>(term: &Term<T>, groups: [&[char]; 3]) -> Result<Array3<T>>
where
    T: LinalgScalar,
{
    let mut axes = Vec::with_capacity(term.labels.len());
    let mut lens = [1_usize; 3];
    for (slot, labels) in groups.iter().enumerate() {
        for label in *labels {
            if let Some(axis) = term.labels.iter().position(|other| other == label) {
                axes.push(axis);
                lens[slot] *= term.array.shape()[axis];
            }
        }
    }

    term.array
        .view()
        .permuted_axes(IxDyn(&axes))
        .to_shape((lens[0], lens[1], lens[2]))
        .map(|grouped| grouped.into_owned())
        .map_err(|error| Error::Backend(error.to_string()))
}

fn contract_pair<T>(lhs: Term<T>, rhs: &Term<T>, keep: &HashSet<char>) -> Result<Term<T>>
where
    T: LinalgScalar,
{
    let lhs = sum_out(lhs, |label| keep.contains(&label) || rhs.labels.contains(&label));
    let rhs_labels = &rhs.labels;

    let batch: Vec<char> = lhs
        .labels
        .iter()
        .filter(|&&label| rhs_labels.contains(&label) && keep.contains(&label))
        .copied()
        .collect();
    let contracted: Vec<char> = lhs
        .labels
        .iter()
        .filter(|&&label| rhs_labels.contains(&label) && !keep.contains(&label))
        .copied()
        .collect();
    let left: Vec<char> = lhs
        .labels
        .iter()
        .filter(|&&label| !rhs_labels.contains(&label))
        .copied()
        .collect();
    // `rhs` is borrowed, so it is only copied when it has axes to sum away.
    let rhs_reduced;
    let rhs = if rhs_labels
        .iter()
        .all(|&label| keep.contains(&label) || lhs.labels.contains(&label))
    {
        rhs
    } else {
        rhs_reduced = sum_out(
            Term {
                labels: rhs.labels.clone(),
                array: rhs.array.clone(),
            },
            |label| keep.contains(&label) || lhs.labels.contains(&label),
        );
        &rhs_reduced
    };
    let right: Vec<char> = rhs
        .labels
        .iter()
        .filter(|&&label| !lhs.labels.contains(&label))
        .copied()
        .collect();

    let lhs_grouped = group(&lhs, [batch.as_slice(), left.as_slice(), contracted.as_slice()])?;
    let rhs_grouped = group(rhs, [batch.as_slice(), contracted.as_slice(), right.as_slice()])?;

    let (batches, rows, _) = lhs_grouped.dim();
    let cols = rhs_grouped.dim().2;
    let mut product = Array3::<T>::zeros((batches, rows, cols));
    for index in 0..batches {
        let block = lhs_grouped
            .index_axis(Axis(0), index)
            .dot(&rhs_grouped.index_axis(Axis(0), index));
        product.index_axis_mut(Axis(0), index).assign(&block);
    }

    let labels: Vec<char> = batch.iter().chain(&left).chain(&right).copied().collect();
    let dims: Vec<usize> = batch
        .iter()
        .chain(&left)
        .filter_map(|label| {
            lhs.labels
                .iter()
                .position(|other| other == label)
                .map(|axis| lhs.array.shape()[axis])
        })
        .chain(right.iter().filter_map(|label| {
            rhs.labels
                .iter()
                .position(|other| other == label)
                .map(|axis| rhs.array.shape()[axis])
        }))
        .collect();
    let array = product
        .to_shape(dims)
        .map(|reshaped| reshaped.into_owned())
        .map_err(|error| Error::Backend(error.to_string()))?;

    Ok(Term { labels, array })
}
