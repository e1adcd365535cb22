use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use anyhow::{Context, Result, ensure};
use candle_core::{DType, Tensor};

/// Greedy token choice with an optional no-repeat n-gram ban over `context`.
pub fn select_greedy(
    logits: &Tensor,
    context: &[u32],
    no_repeat_ngram_size: Option<usize>,
) -> Result<u32> {
    let logits = logits
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()
        .context("failed to extract logits for token selection")?;
    ensure!(!logits.is_empty(), "logits tensor is empty");

    let mut filtered = logits.clone();
    if let Some(ngram) = no_repeat_ngram_size.filter(|&n| n > 1) {
        for token in banned_ngram_tokens(context, ngram) {
            if let Some(score) = filtered.get_mut(token as usize) {
                *score = f32::NEG_INFINITY;
            }
        }
    }

    argmax_index(&filtered)
        .or_else(|| argmax_index(&logits))
        .map(|index| index as u32)
        .context("no finite logits to select from")
}

fn argmax_index(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx)
}

/// Tokens that would complete an n-gram already present in `sequence`.
fn banned_ngram_tokens(sequence: &[u32], ngram: usize) -> HashSet<u32> {
    let mut banned = HashSet::new();
    if ngram <= 1 || sequence.len() < ngram {
        return banned;
    }

    let mut history: HashMap<&[u32], HashSet<u32>> = HashMap::new();
    for window in sequence.windows(ngram) {
        history
            .entry(&window[..ngram - 1])
            .or_default()
            .insert(window[ngram - 1]);
    }
    let prefix = &sequence[sequence.len() - (ngram - 1)..];
    if let Some(tokens) = history.get(prefix) {
        banned.extend(tokens.iter().copied());
    }
    banned
}
