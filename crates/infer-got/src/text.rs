use std::sync::Arc;

use candle_core::{DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{
    Activation, Embedding, Linear, RmsNorm, VarBuilder, embedding, linear_b, linear_no_bias,
    rms_norm,
};

use crate::config::GotTextConfig;

struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(cfg: &GotTextConfig, device: &Device, dtype: DType) -> Result<Self> {
        let head_dim = cfg.head_dim();
        let base = cfg.rope_theta as f32;
        let inv_freq: Vec<f32> = (0..head_dim)
            .step_by(2)
            .map(|i| 1f32 / base.powf(i as f32 / head_dim as f32))
            .collect();
        let half = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq, (1, half), device)?;
        let positions = cfg.max_position_embeddings;
        let t = Tensor::arange(0u32, positions as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((positions, 1))?;
        let freqs = t.matmul(&inv_freq)?;
        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor, offset: usize) -> Result<(Tensor, Tensor)> {
        let (_, _, seq_len, _) = q.dims4()?;
        let cos = self.cos.narrow(0, offset, seq_len)?;
        let sin = self.sin.narrow(0, offset, seq_len)?;
        let q = candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?;
        let k = candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?;
        Ok((q, k))
    }
}

struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    act_fn: Activation,
}

impl Mlp {
    fn new(cfg: &GotTextConfig, vb: VarBuilder) -> Result<Self> {
        let (hidden, inner) = (cfg.hidden_size, cfg.intermediate_size);
        Ok(Self {
            gate_proj: linear_no_bias(hidden, inner, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(hidden, inner, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(inner, hidden, vb.pp("down_proj"))?,
            act_fn: cfg.hidden_act,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let lhs = self.gate_proj.forward(xs)?.apply(&self.act_fn)?;
        let rhs = self.up_proj.forward(xs)?;
        self.down_proj.forward(&(lhs * rhs)?)
    }
}

/// Keys and values accumulated for one decoder layer.
type LayerCache = Option<(Tensor, Tensor)>;

/// Per-generation attention cache. Created empty for every request so the
/// shared model stays immutable.
pub struct DecodeCache {
    layers: Vec<LayerCache>,
}

impl DecodeCache {
    pub fn seq_len(&self) -> usize {
        self.layers
            .first()
            .and_then(|entry| entry.as_ref())
            .and_then(|(k, _)| k.dim(2).ok())
            .unwrap_or(0)
    }
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    rotary: Arc<RotaryEmbedding>,
}

impl Attention {
    fn new(rotary: Arc<RotaryEmbedding>, cfg: &GotTextConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let head_dim = cfg.head_dim();
        let q_out = cfg.num_attention_heads * head_dim;
        let kv_out = cfg.num_key_value_heads * head_dim;
        Ok(Self {
            q_proj: linear_b(hidden, q_out, true, vb.pp("q_proj"))?,
            k_proj: linear_b(hidden, kv_out, true, vb.pp("k_proj"))?,
            v_proj: linear_b(hidden, kv_out, true, vb.pp("v_proj"))?,
            o_proj: linear_no_bias(q_out, hidden, vb.pp("o_proj"))?,
            num_heads: cfg.num_attention_heads,
            num_kv_heads: cfg.num_key_value_heads,
            head_dim,
            rotary,
        })
    }

    fn forward(
        &self,
        xs: &Tensor,
        mask: Option<&Tensor>,
        offset: usize,
        cache: &mut LayerCache,
    ) -> Result<Tensor> {
        let (b_sz, q_len, _) = xs.dims3()?;
        let q = self
            .q_proj
            .forward(xs)?
            .reshape((b_sz, q_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .k_proj
            .forward(xs)?
            .reshape((b_sz, q_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .v_proj
            .forward(xs)?
            .reshape((b_sz, q_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let (q, k) = self.rotary.apply(&q, &k, offset)?;

        let (k, v) = match cache.take() {
            Some((prev_k, prev_v)) => (
                Tensor::cat(&[&prev_k, &k], 2)?,
                Tensor::cat(&[&prev_v, &v], 2)?,
            ),
            None => (k, v),
        };
        *cache = Some((k.clone(), v.clone()));

        let groups = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, groups)?.contiguous()?;
        let v = repeat_kv(v, groups)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?.to_dtype(DType::F32)?;
        let scores = match mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };
        let probs = candle_nn::ops::softmax_last_dim(&scores)?.to_dtype(v.dtype())?;
        let out = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b_sz, q_len, ()))?;
        self.o_proj.forward(&out)
    }
}

fn repeat_kv(xs: Tensor, groups: usize) -> Result<Tensor> {
    if groups == 1 {
        return Ok(xs);
    }
    let (b_sz, kv_heads, seq_len, head_dim) = xs.dims4()?;
    xs.unsqueeze(2)?
        .expand((b_sz, kv_heads, groups, seq_len, head_dim))?
        .reshape((b_sz, kv_heads * groups, seq_len, head_dim))
}

/// Additive causal mask for a prefill of `seq_len` tokens after `offset`
/// cached ones.
fn causal_mask(seq_len: usize, offset: usize, device: &Device) -> Result<Tensor> {
    let total = offset + seq_len;
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..total).map(move |j| if j > i + offset { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (1, 1, seq_len, total), device)
}

struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn new(rotary: Arc<RotaryEmbedding>, cfg: &GotTextConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::new(rotary, cfg, vb.pp("self_attn"))?,
            mlp: Mlp::new(cfg, vb.pp("mlp"))?,
            input_layernorm: rms_norm(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("input_layernorm"))?,
            post_attention_layernorm: rms_norm(
                cfg.hidden_size,
                cfg.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(
        &self,
        xs: &Tensor,
        mask: Option<&Tensor>,
        offset: usize,
        cache: &mut LayerCache,
    ) -> Result<Tensor> {
        let residual = xs;
        let xs = self.input_layernorm.forward(xs)?;
        let xs = (self.self_attn.forward(&xs, mask, offset, cache)? + residual)?;
        let residual = &xs;
        let xs = self.mlp.forward(&xs.apply(&self.post_attention_layernorm)?)?;
        residual + xs
    }
}

/// Qwen2 decoder used as the GOT language model.
pub struct TextModel {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
}

impl TextModel {
    /// `vb` points at the module holding `embed_tokens`, `layers` and
    /// `norm`. Without `lm_head_vb` the output projection is tied to the
    /// embeddings.
    pub fn new(
        cfg: &GotTextConfig,
        vb: VarBuilder,
        lm_head_vb: Option<VarBuilder>,
    ) -> Result<Self> {
        let embed_tokens = embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("embed_tokens"))?;
        let rotary = Arc::new(RotaryEmbedding::new(cfg, vb.device(), vb.dtype())?);
        let layers_vb = vb.pp("layers");
        let layers = (0..cfg.num_hidden_layers)
            .map(|idx| DecoderLayer::new(rotary.clone(), cfg, layers_vb.pp(idx)))
            .collect::<Result<Vec<_>>>()?;
        let norm = rms_norm(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("norm"))?;
        let lm_head = match lm_head_vb {
            Some(vb) => linear_no_bias(cfg.hidden_size, cfg.vocab_size, vb)?,
            None => Linear::new(embed_tokens.embeddings().clone(), None),
        };
        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
        })
    }

    pub fn new_cache(&self) -> DecodeCache {
        DecodeCache {
            layers: vec![None; self.layers.len()],
        }
    }

    pub fn embed(&self, ids: &Tensor) -> Result<Tensor> {
        self.embed_tokens.forward(ids)
    }

    /// Runs `(1, seq, hidden)` embeddings through the decoder and returns the
    /// logits of the last position.
    pub fn forward_embeds(&self, embeds: &Tensor, cache: &mut DecodeCache) -> Result<Tensor> {
        let (_, seq_len, _) = embeds.dims3()?;
        let offset = cache.seq_len();
        let mask = if seq_len > 1 {
            Some(causal_mask(seq_len, offset, embeds.device())?)
        } else {
            None
        };
        let mut xs = embeds.clone();
        for (layer, layer_cache) in self.layers.iter().zip(cache.layers.iter_mut()) {
            xs = layer.forward(&xs, mask.as_ref(), offset, layer_cache)?;
        }
        let last = xs.apply(&self.norm)?.i((.., seq_len - 1, ..))?;
        self.lm_head.forward(&last.contiguous()?)?.squeeze(0)?.to_dtype(DType::F32)
    }
}
