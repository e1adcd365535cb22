use anyhow::{Context, Result, bail, ensure};
use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::{
    Conv2d, Conv2dConfig, LayerNorm, Linear, VarBuilder, conv2d, conv2d_no_bias, layer_norm,
    linear, linear_b,
};

use crate::config::GotVisionConfig;

/// SAM ViT-B encoder followed by the convolutional projector that maps one
/// image onto `(tokens, text_hidden)` language-model embeddings.
pub struct VisionEncoder {
    tower: VisionTower,
    projector: Projector,
}

impl VisionEncoder {
    pub fn load(
        cfg: &GotVisionConfig,
        text_hidden: usize,
        tower_vb: VarBuilder,
        projector_vb: VarBuilder,
    ) -> Result<Self> {
        let tower = VisionTower::load(cfg, tower_vb).context("failed to load vision tower")?;
        let projector = Projector::load(cfg.output_channels, text_hidden, projector_vb)
            .context("failed to load multimodal projector")?;
        Ok(Self { tower, projector })
    }

    /// `pixels` is `(n, 3, size, size)`; returns `(n * tokens_per_image, hidden)`.
    pub fn encode(&self, pixels: &Tensor) -> Result<Tensor> {
        let (count, ..) = pixels.dims4()?;
        let mut outputs = Vec::with_capacity(count);
        // one image at a time keeps global attention memory bounded
        for index in 0..count {
            let image = pixels.narrow(0, index, 1)?;
            let features = self.tower.forward(&image)?;
            let projected = self.projector.forward(&features)?;
            outputs.push(projected.squeeze(0)?);
        }
        Ok(Tensor::cat(&outputs, 0)?)
    }
}

struct VisionTower {
    patch_embed: Conv2d,
    pos_embed: Option<Tensor>,
    layers: Vec<VisionLayer>,
    neck: Neck,
    patch_size: usize,
}

impl VisionTower {
    fn load(cfg: &GotVisionConfig, vb: VarBuilder) -> Result<Self> {
        let patch_cfg = Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        let patch_embed = conv2d(
            cfg.num_channels,
            cfg.hidden_size,
            cfg.patch_size,
            patch_cfg,
            vb.pp("patch_embed").pp("projection"),
        )?;
        let grid = cfg.image_size / cfg.patch_size;
        let pos_embed = if cfg.use_abs_pos {
            Some(vb.get((1, grid, grid, cfg.hidden_size), "pos_embed")?)
        } else {
            None
        };
        let layers_vb = vb.pp("layers");
        let layers = (0..cfg.num_hidden_layers)
            .map(|idx| {
                VisionLayer::load(cfg, idx, layers_vb.pp(idx))
                    .with_context(|| format!("failed to load vision layer {idx}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let neck = Neck::load(cfg, vb.pp("neck"))?;
        Ok(Self {
            patch_embed,
            pos_embed,
            layers,
            neck,
            patch_size: cfg.patch_size,
        })
    }

    fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let (_, channels, height, width) = pixels.dims4()?;
        ensure!(channels == 3, "vision tower expects 3 channels, got {channels}");
        ensure!(
            height % self.patch_size == 0 && width % self.patch_size == 0,
            "image {height}x{width} not divisible by patch size {}",
            self.patch_size
        );

        let mut x = self.patch_embed.forward(pixels)?.permute((0, 2, 3, 1))?;
        if let Some(pos) = &self.pos_embed {
            let (_, grid_h, grid_w, _) = x.dims4()?;
            let (_, pos_h, pos_w, _) = pos.dims4()?;
            ensure!(
                grid_h == pos_h && grid_w == pos_w,
                "patch grid {grid_h}x{grid_w} does not match position embedding {pos_h}x{pos_w}"
            );
            x = x.broadcast_add(&pos.to_dtype(x.dtype())?)?;
        }
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        self.neck.forward(&x.permute((0, 3, 1, 2))?.contiguous()?)
    }
}

struct VisionLayer {
    layer_norm1: LayerNorm,
    attn: VisionAttention,
    layer_norm2: LayerNorm,
    lin1: Linear,
    lin2: Linear,
    window_size: usize,
}

impl VisionLayer {
    fn load(cfg: &GotVisionConfig, index: usize, vb: VarBuilder) -> Result<Self> {
        let window_size = if cfg.global_attn_indexes.contains(&index) {
            0
        } else {
            cfg.window_size
        };
        let attn_tokens = if window_size > 0 {
            window_size
        } else {
            cfg.image_size / cfg.patch_size
        };
        let mlp_vb = vb.pp("mlp");
        Ok(Self {
            layer_norm1: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm1"))?,
            attn: VisionAttention::load(cfg, attn_tokens, vb.pp("attn"))?,
            layer_norm2: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm2"))?,
            lin1: linear(cfg.hidden_size, cfg.mlp_dim, mlp_vb.pp("lin1"))?,
            lin2: linear(cfg.mlp_dim, cfg.hidden_size, mlp_vb.pp("lin2"))?,
            window_size,
        })
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (_, height, width, _) = input.dims4()?;
        let normed = self.layer_norm1.forward(input)?;
        let attended = if self.window_size > 0 {
            let (windows, padded) = window_partition(&normed, self.window_size)?;
            let out = self.attn.forward(&windows)?;
            window_unpartition(&out, self.window_size, padded, (height, width))?
        } else {
            self.attn.forward(&normed)?
        };
        let residual = (input + attended)?;
        let hidden = self.lin1.forward(&self.layer_norm2.forward(&residual)?)?.gelu_erf()?;
        Ok((&residual + self.lin2.forward(&hidden)?)?)
    }
}

struct VisionAttention {
    qkv: Linear,
    proj: Linear,
    rel_pos: Option<(Tensor, Tensor)>,
    num_heads: usize,
    head_dim: usize,
}

impl VisionAttention {
    fn load(cfg: &GotVisionConfig, tokens: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = cfg.hidden_size / cfg.num_attention_heads;
        let rel_pos = if cfg.use_rel_pos {
            let span = 2 * tokens - 1;
            Some((
                vb.get((span, head_dim), "rel_pos_h")?,
                vb.get((span, head_dim), "rel_pos_w")?,
            ))
        } else {
            None
        };
        Ok(Self {
            qkv: linear_b(cfg.hidden_size, cfg.hidden_size * 3, cfg.qkv_bias, vb.pp("qkv"))?,
            proj: linear(cfg.hidden_size, cfg.hidden_size, vb.pp("proj"))?,
            rel_pos,
            num_heads: cfg.num_attention_heads,
            head_dim,
        })
    }

    /// `input` is `(batch, h, w, hidden)` for a window or the whole grid.
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (batch, height, width, hidden) = input.dims4()?;
        let dtype = input.dtype();
        let seq_len = height * width;
        let heads = batch * self.num_heads;

        // (3, batch * heads, seq, head_dim)
        let qkv = self
            .qkv
            .forward(input)?
            .reshape((batch, seq_len, 3, self.num_heads, self.head_dim))?
            .permute((2, 0, 3, 1, 4))?
            .reshape((3, heads, seq_len, self.head_dim))?
            .to_dtype(DType::F32)?;
        let q = qkv.get(0)?.contiguous()?;
        let k = qkv.get(1)?.contiguous()?;
        let v = qkv.get(2)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let mut scores = (q.matmul(&k.t()?)? * scale)?;
        if let Some((rel_h, rel_w)) = &self.rel_pos {
            scores = add_decomposed_rel_pos(&scores, &q, rel_h, rel_w, (height, width))?;
        }
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = probs
            .matmul(&v)?
            .reshape((batch, self.num_heads, height, width, self.head_dim))?
            .permute((0, 2, 3, 1, 4))?
            .reshape((batch, height, width, hidden))?
            .to_dtype(dtype)?;
        Ok(self.proj.forward(&context)?)
    }
}

/// Gathers `(q_size, k_size, dim)` embeddings for every relative offset.
fn relative_positions(size: usize, table: &Tensor) -> Result<Tensor> {
    let (span, dim) = table.dims2()?;
    if span != 2 * size - 1 {
        bail!("relative position table has {span} rows, expected {}", 2 * size - 1);
    }
    let index: Vec<u32> = (0..size)
        .flat_map(|q| (0..size).map(move |k| (q + size - 1 - k) as u32))
        .collect();
    let index = Tensor::from_vec(index, size * size, table.device())?;
    Ok(table
        .to_dtype(DType::F32)?
        .index_select(&index, 0)?
        .reshape((size, size, dim))?)
}

/// Adds the height and width relative position terms to `(heads, q, k)` scores.
fn add_decomposed_rel_pos(
    scores: &Tensor,
    q: &Tensor,
    rel_pos_h: &Tensor,
    rel_pos_w: &Tensor,
    (height, width): (usize, usize),
) -> Result<Tensor> {
    let (heads, _, dim) = q.dims3()?;
    let table_h = relative_positions(height, rel_pos_h)?;
    let table_w = relative_positions(width, rel_pos_w)?;
    let r_q = q.reshape((heads, height, width, dim))?;

    // rel_h[b, y, x, ky] = sum_c r_q[b, y, x, c] * table_h[y, ky, c]
    let rel_h = r_q
        .permute((1, 0, 2, 3))?
        .reshape((height, heads * width, dim))?
        .contiguous()?
        .matmul(&table_h.transpose(1, 2)?.contiguous()?)?
        .reshape((height, heads, width, height))?
        .permute((1, 0, 2, 3))?;
    // rel_w[b, y, x, kx] = sum_c r_q[b, y, x, c] * table_w[x, kx, c]
    let rel_w = r_q
        .permute((2, 0, 1, 3))?
        .reshape((width, heads * height, dim))?
        .contiguous()?
        .matmul(&table_w.transpose(1, 2)?.contiguous()?)?
        .reshape((width, heads, height, width))?
        .permute((1, 2, 0, 3))?;

    let seq_len = height * width;
    let scores = scores
        .reshape((heads, height, width, height, width))?
        .broadcast_add(&rel_h.unsqueeze(D::Minus1)?)?
        .broadcast_add(&rel_w.unsqueeze(3)?)?;
    Ok(scores.reshape((heads, seq_len, seq_len))?)
}

fn window_partition(x: &Tensor, window: usize) -> Result<(Tensor, (usize, usize))> {
    let (batch, height, width, channels) = x.dims4()?;
    let pad_h = (window - height % window) % window;
    let pad_w = (window - width % window) % window;
    let padded = x.pad_with_zeros(1, 0, pad_h)?.pad_with_zeros(2, 0, pad_w)?;
    let (hp, wp) = (height + pad_h, width + pad_w);
    let windows = padded
        .reshape((batch, hp / window, window, wp / window, window, channels))?
        .permute((0, 1, 3, 2, 4, 5))?
        .reshape(((), window, window, channels))?;
    Ok((windows, (hp, wp)))
}

fn window_unpartition(
    windows: &Tensor,
    window: usize,
    (hp, wp): (usize, usize),
    (height, width): (usize, usize),
) -> Result<Tensor> {
    let (count, _, _, channels) = windows.dims4()?;
    let batch = count / ((hp / window) * (wp / window));
    let restored = windows
        .reshape((batch, hp / window, wp / window, window, window, channels))?
        .permute((0, 1, 3, 2, 4, 5))?
        .reshape((batch, hp, wp, channels))?;
    if hp == height && wp == width {
        return Ok(restored);
    }
    Ok(restored.narrow(1, 0, height)?.narrow(2, 0, width)?.contiguous()?)
}

/// Channel-first layer norm used by the neck.
struct LayerNorm2d {
    norm: LayerNorm,
}

impl LayerNorm2d {
    fn load(channels: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm: layer_norm(channels, eps, vb)?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = self.norm.forward(&x.permute((0, 2, 3, 1))?)?;
        Ok(y.permute((0, 3, 1, 2))?)
    }
}

struct Neck {
    conv1: Conv2d,
    layer_norm1: LayerNorm2d,
    conv2: Conv2d,
    layer_norm2: LayerNorm2d,
}

impl Neck {
    fn load(cfg: &GotVisionConfig, vb: VarBuilder) -> Result<Self> {
        let out = cfg.output_channels;
        let padded = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            conv1: conv2d_no_bias(
                cfg.hidden_size,
                out,
                1,
                Conv2dConfig::default(),
                vb.pp("conv1"),
            )?,
            layer_norm1: LayerNorm2d::load(out, cfg.layer_norm_eps, vb.pp("layer_norm1"))?,
            conv2: conv2d_no_bias(out, out, 3, padded, vb.pp("conv2"))?,
            layer_norm2: LayerNorm2d::load(out, cfg.layer_norm_eps, vb.pp("layer_norm2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.layer_norm1.forward(&self.conv1.forward(x)?)?;
        self.layer_norm2.forward(&self.conv2.forward(&x)?)
    }
}

/// Two stride-2 convolutions then a linear map into the text hidden size.
struct Projector {
    conv_upsampler1: Conv2d,
    conv_upsampler2: Conv2d,
    linear: Linear,
}

impl Projector {
    fn load(channels: usize, text_hidden: usize, vb: VarBuilder) -> Result<Self> {
        let strided = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        Ok(Self {
            conv_upsampler1: conv2d_no_bias(
                channels,
                channels * 2,
                3,
                strided,
                vb.pp("conv_upsampler1"),
            )?,
            conv_upsampler2: conv2d_no_bias(
                channels * 2,
                text_hidden,
                3,
                strided,
                vb.pp("conv_upsampler2"),
            )?,
            linear: linear(text_hidden, text_hidden, vb.pp("multimodal_projector"))?,
        })
    }

    fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let x = self.conv_upsampler1.forward(features)?;
        let x = self.conv_upsampler2.forward(&x)?;
        let tokens = x.flatten_from(2)?.transpose(1, 2)?.contiguous()?;
        Ok(self.linear.forward(&tokens)?)
    }
}

/// Zero-weight encoder for shape tests.
#[cfg(test)]
pub(crate) fn zeros_encoder(cfg: &GotVisionConfig, text_hidden: usize) -> Result<VisionEncoder> {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    VisionEncoder::load(cfg, text_hidden, vb.pp("vision_tower"), vb.pp("multi_modal_projector"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> GotVisionConfig {
        GotVisionConfig {
            hidden_size: 8,
            output_channels: 4,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            image_size: 64,
            patch_size: 8,
            window_size: 3,
            global_attn_indexes: vec![1],
            mlp_dim: 16,
            ..GotVisionConfig::default()
        }
    }

    #[test]
    fn encodes_each_image_to_projected_tokens() {
        let cfg = tiny_config();
        let encoder = zeros_encoder(&cfg, 6).unwrap();
        let pixels = Tensor::zeros((2, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let tokens = encoder.encode(&pixels).unwrap();
        // 8x8 patch grid, two stride-2 convolutions -> 2x2 tokens per image
        assert_eq!(tokens.dims(), &[8, 6]);
    }

    #[test]
    fn window_partition_pads_and_restores() {
        let x = Tensor::arange(0f32, 2.0 * 5.0 * 5.0 * 3.0, &Device::Cpu)
            .unwrap()
            .reshape((2, 5, 5, 3))
            .unwrap();
        let (windows, padded) = window_partition(&x, 3).unwrap();
        assert_eq!(padded, (6, 6));
        assert_eq!(windows.dims(), &[8, 3, 3, 3]);
        let restored = window_unpartition(&windows, 3, padded, (5, 5)).unwrap();
        let diff = (restored - &x).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(diff.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn relative_positions_index_offsets() {
        // row r of the table holds the value r for every channel
        let table = Tensor::arange(0f32, 5.0, &Device::Cpu)
            .unwrap()
            .reshape((5, 1))
            .unwrap();
        let gathered = relative_positions(3, &table).unwrap();
        let values = gathered.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // q - k + size - 1
        assert_eq!(values, vec![2.0, 1.0, 0.0, 3.0, 2.0, 1.0, 4.0, 3.0, 2.0]);
        assert!(relative_positions(4, &table).is_err());
    }

    #[test]
    fn rel_pos_bias_adds_height_and_width_terms() {
        let device = Device::Cpu;
        // one head over a 2x2 grid with unit query vectors
        let q = Tensor::ones((1, 4, 1), DType::F32, &device).unwrap();
        let scores = Tensor::zeros((1, 4, 4), DType::F32, &device).unwrap();
        let rel_h = Tensor::new(&[[1f32], [2.0], [3.0]], &device).unwrap();
        let rel_w = Tensor::new(&[[10f32], [20.0], [30.0]], &device).unwrap();
        let biased = add_decomposed_rel_pos(&scores, &q, &rel_h, &rel_w, (2, 2)).unwrap();
        let rows = biased.squeeze(0).unwrap().to_vec2::<f32>().unwrap();
        // query (0, 0) against keys (0,0) (0,1) (1,0) (1,1)
        assert_eq!(rows[0], vec![22.0, 12.0, 21.0, 11.0]);
        // query (1, 1)
        assert_eq!(rows[3], vec![33.0, 23.0, 32.0, 22.0]);
    }
}
