use csm::model::{FoldingConfig, KMaxPoolingConfig, Layer, SentenceConvolutionConfig, SoftmaxConfig};
use csm::{Axis, Cpu, Meta, Space, Ten64};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn tensor(shape: Vec<usize>, values: &[f64]) -> Ten64 {
    Ten64::from_fn(shape, |i| values[i % values.len()])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn softmax_columns_sum_to_one(
        (w, f, d, b) in (1usize..5, 1usize..4, 1usize..4, 1usize..4),
        classes in 1usize..6,
        seed in any::<u64>(),
        values in prop::collection::vec(-5.0f64..5.0, 1..32),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let softmax = SoftmaxConfig { n_classes: classes, n_input_dimensions: w * f * d }
            .build::<Cpu>(&mut rng)
            .unwrap();
        let x = tensor(vec![b, w, f, d], &values);
        let axes = [Axis::Batch, Axis::Width, Axis::FeatureMap, Axis::Depth];
        let meta = Meta::full_width(Space::infer(&x, &axes).unwrap());
        let (y, _, _) = softmax.fprop(&x, meta).unwrap();
        prop_assert_eq!(y.shape.clone(), vec![classes, b]);
        for column in 0..b {
            let total: f64 = (0..classes).map(|c| y.data[c * b + column]).sum();
            prop_assert!((total - 1.0).abs() < 1e-9, "column {} sums to {}", column, total);
        }
    }

    #[test]
    fn convolution_widens_by_kernel_width(
        width in 1usize..12,
        k in 1usize..6,
        d in 1usize..3,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let conv = SentenceConvolutionConfig::new(2, k, d).build::<Cpu>(&mut rng).unwrap();
        let x = Ten64::ones(vec![1, width, d]);
        let meta = Meta::full_width(Space::infer(&x, &[Axis::Batch, Axis::Width, Axis::Depth]).unwrap());
        let (_, out_meta, _) = conv.fprop(&x, meta).unwrap();
        prop_assert_eq!(out_meta.space_below.extent(Axis::Width).unwrap(), width + k - 1);
        prop_assert_eq!(out_meta.lengths, vec![width + k - 1]);
    }

    #[test]
    fn kmax_preserves_order(
        row in prop::collection::vec(-100.0f64..100.0, 1..16),
        k in 1usize..8,
    ) {
        let pooling = KMaxPoolingConfig { k }.build::<Cpu>().unwrap();
        let x = Ten64::new(vec![1, row.len()], row.clone());
        let meta = Meta::full_width(Space::infer(&x, &[Axis::Batch, Axis::Width]).unwrap());
        let (y, _, _) = pooling.fprop(&x, meta).unwrap();

        let kept = k.min(row.len());
        let selected = &y.data[..kept];
        // the selection is a subsequence of the row
        let mut rest = row.iter();
        for value in selected {
            prop_assert!(rest.any(|v| v == value), "{:?} is not a subsequence of {:?}", selected, row);
        }
        // and nothing left out beats anything kept
        let smallest = selected.iter().copied().fold(f64::INFINITY, f64::min);
        let mut sorted = row.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        prop_assert_eq!(smallest, sorted[kept - 1]);
        prop_assert!(y.data[kept..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn sum_folding_passes_ones_back_to_both_halves(
        half in 1usize..5,
        width in 1usize..6,
        b in 1usize..3,
    ) {
        let fold = FoldingConfig::along(Axis::FeatureMap).build_sum::<Cpu>();
        let x = Ten64::zeros(vec![b, 2 * half, width]);
        let meta = Meta::full_width(Space::infer(&x, &[Axis::Batch, Axis::FeatureMap, Axis::Width]).unwrap());
        let (y, out_meta, state) = fold.fprop(&x, meta).unwrap();
        prop_assert_eq!(out_meta.space_below.extent(Axis::FeatureMap).unwrap(), half);
        let (dx, dx_meta) = fold.bprop(&Ten64::ones_like(&y), out_meta, &state).unwrap();
        prop_assert_eq!(dx, Ten64::ones(vec![b, 2 * half, width]));
        prop_assert_eq!(dx_meta.space_below.flat_axes(), vec![Axis::Batch, Axis::FeatureMap, Axis::Width]);
    }
}
