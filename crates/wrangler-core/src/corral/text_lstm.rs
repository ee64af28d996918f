use tch::nn::{self, Module};
use tch::{Device, Tensor};
use text_tools::{TextProcessor, PAD_CODE};

use crate::architecture::{require_sources, Architecture, Forward};
use crate::config::{DenseParams, GraphParams};
use crate::error::Result;
use crate::layers::{
    append_dense, concat_stacks, onehot_decode, onehot_encode, Dense, EmbeddingLookup, SourceStack,
};
use crate::losses::{loss_softmax_ce, sum_losses};

/// Next-character model over strings.
///
/// Inputs are padded to `max_string_size` codes and one-hot encoded (or
/// embedded when `embed_size` is set). Every output head scores the whole
/// vocabulary; predictions and targets are single characters.
#[derive(Debug)]
pub struct TextLstmModel {
    text_map: TextProcessor,
    encoder: Option<EmbeddingLookup>,
    stacks: Vec<SourceStack>,
    heads: Vec<Dense>,
    device: Device,
}

impl TextLstmModel {
    pub fn text_map(&self) -> &TextProcessor {
        &self.text_map
    }

    fn vocab_size(&self) -> i64 {
        self.text_map.vocab_size() as i64
    }

    /// `[batch, pad_len]` padded codes.
    fn encode_inputs(&self, texts: &[String]) -> Tensor {
        let pad_len = self.text_map.pad_len() as i64;
        let flat: Vec<i64> = self
            .text_map
            .encode_batch(texts, true)
            .into_iter()
            .flatten()
            .collect();
        Tensor::from_slice(&flat)
            .view([texts.len() as i64, pad_len])
            .to_device(self.device)
    }

    /// `[batch]` code of each target's first character.
    fn encode_targets(&self, texts: &[String]) -> Tensor {
        let codes: Vec<i64> = self
            .text_map
            .encode_batch(texts, false)
            .into_iter()
            .map(|codes| codes.first().copied().unwrap_or(PAD_CODE))
            .collect();
        Tensor::from_slice(&codes).to_device(self.device)
    }

    fn make_onehot_encode_layer(&self, codes: &Tensor) -> Tensor {
        match &self.encoder {
            Some(encoder) => encoder.forward(codes),
            None => onehot_encode(codes, self.vocab_size()),
        }
    }
}

impl Architecture for TextLstmModel {
    type Input = Vec<String>;
    type Target = Vec<String>;
    type Prediction = Vec<String>;

    const KIND: &'static str = "text_lstm";

    fn setup_layers(vs: &nn::Path, params: &GraphParams, device: Device) -> Result<Self> {
        require_sources(params)?;

        let text_map = TextProcessor::new(params.max_string_size)?;
        let vocab_size = text_map.vocab_size() as i64;
        let steps = text_map.pad_len() as i64;

        let encoder = params.embed_size.map(|dim| {
            EmbeddingLookup::new(&(vs / "embedding"), vocab_size, dim, params.embed_max_norm)
        });
        let features = params.embed_size.unwrap_or(vocab_size);

        let stacks: Vec<SourceStack> = (0..params.in_sizes.len())
            .map(|idx| {
                SourceStack::new(
                    &(vs / format!("source_{}", idx)),
                    steps,
                    features,
                    &params.dense_params,
                    &params.recurr_params,
                )
            })
            .collect();

        let embed_dim: i64 = stacks.iter().map(SourceStack::out_dim).sum();
        let heads = (0..params.out_sizes.len())
            .map(|idx| {
                append_dense(
                    &(vs / format!("preact_{}", idx)),
                    embed_dim,
                    &DenseParams::units(vocab_size),
                )
            })
            .collect();

        Ok(Self {
            text_map,
            encoder,
            stacks,
            heads,
            device,
        })
    }

    fn forward_t(&self, inputs: &[Vec<String>], train: bool) -> Result<Forward> {
        let encoded: Vec<Tensor> = inputs
            .iter()
            .map(|texts| self.make_onehot_encode_layer(&self.encode_inputs(texts)))
            .collect();
        let embeds = concat_stacks(&self.stacks, &encoded, train);
        let preacts = self.heads.iter().map(|head| head.forward(&embeds)).collect();

        Ok(Forward {
            preacts,
            embeds: Some(embeds),
        })
    }

    fn outputs(&self, forward: &Forward) -> Result<Vec<Vec<String>>> {
        forward
            .preacts
            .iter()
            .map(|preact| -> Result<Vec<String>> {
                let codes = Vec::<i64>::try_from(&onehot_decode(preact).to_device(Device::Cpu))?;
                Ok(codes
                    .iter()
                    .map(|&code| self.text_map.ints_to_string(&[code]))
                    .collect())
            })
            .collect()
    }

    fn loss(&self, forward: &Forward, targets: &[Vec<String>]) -> Result<Tensor> {
        let onehots: Vec<Tensor> = targets
            .iter()
            .map(|texts| onehot_encode(&self.encode_targets(texts), self.vocab_size()))
            .collect();
        sum_losses(&forward.preacts, &onehots, loss_softmax_ce)
    }
}
