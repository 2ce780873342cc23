use anyhow::{anyhow, bail, Result};
use candle_core::{DType, Tensor};

/// Mean over tokens whose mask is set: `[B,T,H] x [B,T] -> [B,H]`.
pub fn masked_mean(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, seq, _) = hidden
        .dims3()
        .map_err(|_| anyhow!("hidden shape must be [B,T,H], got {:?}", hidden.dims()))?;
    if attention_mask.dims() != [batch, seq] {
        bail!("mask shape {:?} does not match hidden [{batch}, {seq}, _]", attention_mask.dims());
    }
    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&mask.unsqueeze(2)?)?.sum(1)?;
    // all-padding rows divide by one
    let counts = mask.sum_keepdim(1)?.clamp(1f64, f64::MAX)?;
    Ok(summed.broadcast_div(&counts)?)
}

/// Scales each row of a `[B,H]` tensor to unit length.
pub fn l2_normalize_rows(x: &Tensor) -> Result<Tensor> {
    let eps = match x.dtype() { DType::F16 | DType::BF16 => 1e-6, _ => 1e-12 };
    let norm = (x.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    Ok(x.broadcast_div(&norm)?)
}

pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    l2_normalize_rows(&masked_mean(hidden, attention_mask)?)
}
