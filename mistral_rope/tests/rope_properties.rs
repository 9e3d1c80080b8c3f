//! End-to-end properties of the rotary embedding pipeline.
//!
//! Run with: `cargo test -p mistral_rope`

use candle_core::{D, DType, Device, IndexOp, Tensor};

use mistral_rope::config::rope_config::RopeConfig;
use mistral_rope::error::Result;
use mistral_rope::nn::rope::batch::make_rotary_values;
use mistral_rope::nn::rope::embedding::RotaryEmbedding;
use mistral_rope::nn::rope::position::rotary_values_at_position;
use mistral_rope::nn::rope::table::FrequencyTable;
use mistral_rope::nn::rope::{RotaryValues, apply_rotary_emb, rotate_half};

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    let diff = (a.to_dtype(DType::F32)? - b.to_dtype(DType::F32)?)?;
    Ok(diff.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
}

mod table_tests {
    use super::*;

    #[test]
    fn shapes_for_default_head_dim() -> Result<()> {
        let config = RopeConfig::default();
        for seq_len in [0, 1, 2, 17] {
            let table = FrequencyTable::new(seq_len, &config, &Device::Cpu)?;
            assert_eq!(table.sin().dims(), table.cos().dims());
            assert_eq!(table.sin().dims(), &[seq_len, 128]);
        }
        Ok(())
    }

    #[test]
    fn halves_are_duplicated() -> Result<()> {
        let config = RopeConfig::default();
        let table = FrequencyTable::new(12, &config, &Device::Cpu)?;
        let diff = max_abs_diff(
            &table.cos().narrow(D::Minus1, 0, 64)?,
            &table.cos().narrow(D::Minus1, 64, 64)?,
        )?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}

mod rotation_tests {
    use super::*;

    #[test]
    fn rotate_half_twice_is_negation() -> Result<()> {
        let x = Tensor::randn(0f32, 1.0, (3, 7, 128), &Device::Cpu)?;
        let twice = rotate_half(&rotate_half(&x)?)?;
        assert_eq!(max_abs_diff(&twice, &x.neg()?)?, 0.0);
        Ok(())
    }

    #[test]
    fn position_zero_is_identity() -> Result<()> {
        let device = Device::Cpu;
        let config = RopeConfig::default();
        let values = make_rotary_values(None, 2, 5, &config, &device)?;
        let step = rotary_values_at_position(&values, 0usize)?;

        let x = Tensor::randn(0f32, 1.0, (2, 8, 1, 128), &device)?;
        let out = apply_rotary_emb(&x, &step)?;
        assert_eq!(max_abs_diff(&out, &x)?, 0.0);
        Ok(())
    }

    #[test]
    fn small_worked_example() -> Result<()> {
        let device = Device::Cpu;
        let config = RopeConfig::with_head_dim(4);
        let values = make_rotary_values(None, 1, 2, &config, &device)?;

        assert_eq!(values.sin().i((0, 0))?.to_vec1::<f32>()?, vec![0.0; 4]);
        assert_eq!(values.cos().i((0, 0))?.to_vec1::<f32>()?, vec![1.0; 4]);
        let sin1 = values.sin().i((0, 1))?.to_vec1::<f32>()?;
        let cos1 = values.cos().i((0, 1))?.to_vec1::<f32>()?;
        let expected_sin = [1f32.sin(), 0.01f32.sin(), 1f32.sin(), 0.01f32.sin()];
        let expected_cos = [1f32.cos(), 0.01f32.cos(), 1f32.cos(), 0.01f32.cos()];
        for i in 0..4 {
            assert!((sin1[i] - expected_sin[i]).abs() < 1e-6);
            assert!((cos1[i] - expected_cos[i]).abs() < 1e-6);
        }

        let step = rotary_values_at_position(&values, 0usize)?;
        let m = Tensor::new(&[[[1f32, 2., 3., 4.]]], &device)?;
        let out = apply_rotary_emb(&m, &step)?;
        assert_eq!(out.flatten_all()?.to_vec1::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn output_keeps_input_precision() -> Result<()> {
        let device = Device::Cpu;
        let config = RopeConfig::with_head_dim(32);
        let values = make_rotary_values(None, 1, 9, &config, &device)?;
        let x = Tensor::randn(0f32, 1.0, (1, 4, 9, 32), &device)?;

        let reference = apply_rotary_emb(&x, &values)?;
        for dtype in [DType::F16, DType::BF16, DType::F64] {
            let out = apply_rotary_emb(&x.to_dtype(dtype)?, &values)?;
            assert_eq!(out.dtype(), dtype);
            assert!(max_abs_diff(&out, &reference)? < 1e-1);
        }
        Ok(())
    }

    #[test]
    fn half_precision_tables_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let config = RopeConfig::with_head_dim(8);
        let (sin, cos) = make_rotary_values(None, 1, 3, &config, &device)?.into_parts();
        let values = RotaryValues::new(sin.to_dtype(DType::BF16)?, cos.to_dtype(DType::BF16)?)?;
        let x = Tensor::zeros((1, 3, 8), DType::BF16, &device)?;
        assert!(apply_rotary_emb(&x, &values).is_err());
        Ok(())
    }
}

mod padding_tests {
    use super::*;

    #[test]
    fn padded_position_sees_angle_zero() -> Result<()> {
        let device = Device::Cpu;
        let config = RopeConfig::default();
        let seq_len = 8;
        let padding = [0usize, 1, 4, seq_len - 1];
        let values = make_rotary_values(Some(&padding), padding.len(), seq_len, &config, &device)?;
        let base = make_rotary_values(None, 1, seq_len, &config, &device)?;

        for (row, &p) in padding.iter().enumerate() {
            assert_eq!(
                values.sin().i((row, p))?.to_vec1::<f32>()?,
                base.sin().i((0, 0))?.to_vec1::<f32>()?
            );
            assert_eq!(
                values.cos().i((row, p))?.to_vec1::<f32>()?,
                base.cos().i((0, 0))?.to_vec1::<f32>()?
            );
        }
        Ok(())
    }

    #[test]
    fn padded_row_matches_unpadded_sequence() -> Result<()> {
        // A row padded by `p` rotates its real tokens exactly like the same
        // tokens in an unpadded batch of length `seq_len - p`.
        let device = Device::Cpu;
        let config = RopeConfig::with_head_dim(16);
        let (seq_len, p) = (7, 3);

        let real = Tensor::randn(0f32, 1.0, (1, 2, seq_len - p, 16), &device)?;
        let pad = Tensor::zeros((1, 2, p, 16), DType::F32, &device)?;
        let padded = Tensor::cat(&[&pad, &real], 2)?;

        let padded_values = make_rotary_values(Some(&[p]), 1, seq_len, &config, &device)?;
        let plain_values = make_rotary_values(None, 1, seq_len - p, &config, &device)?;

        let from_padded = apply_rotary_emb(&padded, &padded_values)?.narrow(2, p, seq_len - p)?;
        let from_plain = apply_rotary_emb(&real, &plain_values)?;
        assert!(max_abs_diff(&from_padded, &from_plain)? < 1e-6);
        Ok(())
    }
}

mod decode_tests {
    use super::*;

    #[test]
    fn single_step_matches_full_sequence() -> Result<()> {
        let device = Device::Cpu;
        let config = RopeConfig::default();
        let seq_len = 6;
        let values = make_rotary_values(Some(&[0, 2]), 2, seq_len, &config, &device)?;

        let x = Tensor::randn(0f32, 1.0, (2, 4, seq_len, 128), &device)?;
        let full = apply_rotary_emb(&x, &values)?;

        for t in 0..seq_len {
            let step_values = rotary_values_at_position(&values, t)?;
            let step = apply_rotary_emb(&x.narrow(2, t, 1)?, &step_values)?;
            assert!(max_abs_diff(&step, &full.narrow(2, t, 1)?)? < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn per_row_steps_match_full_sequence() -> Result<()> {
        let device = Device::Cpu;
        let rope = RotaryEmbedding::new(&RopeConfig::with_head_dim(8), 32, &device)?;
        let values = rope.rotary_values(None, 2, 5)?;

        let x = Tensor::randn(0f32, 1.0, (2, 3, 5, 8), &device)?;
        let full = apply_rotary_emb(&x, &values)?;

        let positions = vec![4usize, 1];
        let step_values = rope.at_position(&values, positions.clone())?;
        let step_input = Tensor::stack(
            &[x.i((0, .., 4..5))?, x.i((1, .., 1..2))?],
            0,
        )?;
        let step = apply_rotary_emb(&step_input, &step_values)?;
        let expected = Tensor::stack(
            &[full.i((0, .., 4..5))?, full.i((1, .., 1..2))?],
            0,
        )?;
        assert!(max_abs_diff(&step, &expected)? < 1e-6);
        Ok(())
    }
}
