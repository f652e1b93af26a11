//! §8 scenario tests S1-S6: concrete end-to-end pipelines exercised through
//! `TransformManager` + `Orchestrator`, the same way integration tests drove
//! the teacher's backtests against fixture configurations.

use dataflow_engine::events::CancellationToken;
use dataflow_engine::storage::IntermediateStorage;
use dataflow_engine::{
    Constant, Event, EventDispatcher, EventFilter, Frame, InputMapping, InputValue, IoDataType,
    IoMetaData, NodeRef, OptionValue, Orchestrator, TimeUnit, Timeframe, TransformBase,
    TransformCategory, TransformConfiguration, TransformManager, TransformsMetaData, Value,
};
use polars::prelude::{Column, DataFrame, DataType, NamedFrom, Series, TimeUnit as PolarsTimeUnit};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn index_series(len: usize) -> Series {
    Series::new(
        dataflow_engine::frame::INDEX_COL.into(),
        (0..len as i64).collect::<Vec<_>>(),
    )
    .cast(&DataType::Datetime(PolarsTimeUnit::Nanosecond, None))
    .unwrap()
}

fn base_frame(column: &str, values: &[f64]) -> Frame {
    let df = DataFrame::new(vec![
        Column::from(index_series(values.len())),
        Column::from(Series::new(column.into(), values.to_vec())),
    ])
    .unwrap();
    Frame::from_df(df).unwrap()
}

fn col_f64(frame: &Frame, name: &str) -> Vec<Option<f64>> {
    frame
        .as_df()
        .column(name)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Float64)
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .collect()
}

fn meta(id: &str, category: TransformCategory, inputs: Vec<IoMetaData>) -> Arc<TransformsMetaData> {
    Arc::new(TransformsMetaData {
        id: id.to_string(),
        name: id.to_string(),
        category: Some(category),
        inputs,
        outputs: vec![IoMetaData::new(IoDataType::Decimal, "result", "Result")],
        ..Default::default()
    })
}

fn cfg(
    id: &str,
    metadata: Arc<TransformsMetaData>,
    options: HashMap<String, OptionValue>,
    inputs: InputMapping,
) -> TransformConfiguration {
    TransformConfiguration {
        metadata,
        id: id.to_string(),
        options,
        inputs,
        timeframe: Timeframe::new(TimeUnit::Day, 1),
        session: None,
    }
}

fn two_asset_base(
    a_asset: &str,
    a_values: &[f64],
    b_asset: &str,
    b_values: &[f64],
) -> HashMap<String, HashMap<String, Frame>> {
    let mut by_asset = HashMap::new();
    by_asset.insert(a_asset.to_string(), base_frame("c", a_values));
    by_asset.insert(b_asset.to_string(), base_frame("c", b_values));
    let mut data = HashMap::new();
    data.insert("1D".to_string(), by_asset);
    data
}

/// Reads the base `c` column straight through as `result`, the way a
/// compiler-synthesized `src.c` producer node would — every chain below
/// roots at one of these rather than wiring a producer-free `NodeRef`.
struct IdentityFromBase(TransformConfiguration);
impl TransformBase for IdentityFromBase {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        vec!["c".to_string()]
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        frame.rename("c", "result")
    }
}

/// `B(type=sma, period=N)`: simple moving average over its single input,
/// null until `period` rows have accumulated.
struct Sma(TransformConfiguration);
impl TransformBase for Sma {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        Vec::new()
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        let period = self
            .0
            .option("period")
            .and_then(|v| v.as_decimal())
            .unwrap_or(1.0) as usize;
        let input = self.0.input_ids().into_iter().next().unwrap();
        let values = col_f64(&frame, &input);
        let mut out = Vec::with_capacity(values.len());
        for i in 0..values.len() {
            if i + 1 < period {
                out.push(None);
                continue;
            }
            let window = &values[i + 1 - period..=i];
            if window.iter().any(|v| v.is_none()) {
                out.push(None);
            } else {
                let sum: f64 = window.iter().map(|v| v.unwrap()).sum();
                out.push(Some(sum / period as f64));
            }
        }
        let df = DataFrame::new(vec![
            Column::from(frame.index()?.clone()),
            Column::from(Series::new("result".into(), out)),
        ])
        .unwrap();
        Frame::from_df(df)
    }
}

/// `C(type=diff)`: first difference of its single input.
struct Diff(TransformConfiguration);
impl TransformBase for Diff {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        Vec::new()
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        let input = self.0.input_ids().into_iter().next().unwrap();
        let values = col_f64(&frame, &input);
        let mut out = vec![None];
        for w in values.windows(2) {
            match (w[0], w[1]) {
                (Some(a), Some(b)) => out.push(Some(b - a)),
                _ => out.push(None),
            }
        }
        let df = DataFrame::new(vec![
            Column::from(frame.index()?.clone()),
            Column::from(Series::new("result".into(), out)),
        ])
        .unwrap();
        Frame::from_df(df)
    }
}

/// `D(type=subtract)`: `left - right`, positionally zipped after the
/// outer-join (used by the diamond-merge scenario, S2).
struct Subtract(TransformConfiguration);
impl TransformBase for Subtract {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        Vec::new()
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        let mut ids = self.0.input_ids().into_iter();
        let left = ids.next().unwrap();
        let right = ids.next().unwrap();
        let a = col_f64(&frame, &left);
        let b = col_f64(&frame, &right);
        let out: Vec<Option<f64>> = a
            .into_iter()
            .zip(b)
            .map(|(x, y)| match (x, y) {
                (Some(x), Some(y)) => Some(x - y),
                _ => None,
            })
            .collect();
        let df = DataFrame::new(vec![
            Column::from(frame.index()?.clone()),
            Column::from(Series::new("result".into(), out)),
        ])
        .unwrap();
        Frame::from_df(df)
    }
}

/// `top_k(k=N)`: cross-sectional, flags the top `N` assets by value on each
/// row with `1.0`, everyone else `0.0`.
struct TopK(TransformConfiguration);
impl TransformBase for TopK {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        Vec::new()
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        let k = self.0.option("k").and_then(|v| v.as_decimal()).unwrap_or(1.0) as usize;
        let asset_columns: Vec<String> = frame
            .column_names()
            .into_iter()
            .filter(|c| c != dataflow_engine::frame::INDEX_COL)
            .collect();
        let per_asset: HashMap<String, Vec<Option<f64>>> = asset_columns
            .iter()
            .map(|a| (a.clone(), col_f64(&frame, a)))
            .collect();

        let height = frame.height();
        let mut series_by_asset: HashMap<&String, Vec<f64>> = asset_columns
            .iter()
            .map(|a| (a, Vec::with_capacity(height)))
            .collect();
        for row in 0..height {
            let mut ranked: Vec<(&String, f64)> = asset_columns
                .iter()
                .filter_map(|a| per_asset[a][row].map(|v| (a, v)))
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            let winners: std::collections::HashSet<&String> =
                ranked.into_iter().take(k).map(|(a, _)| a).collect();
            for asset in &asset_columns {
                let flag = if winners.contains(asset) { 1.0 } else { 0.0 };
                series_by_asset.get_mut(asset).unwrap().push(flag);
            }
        }

        let mut columns = vec![Column::from(frame.index()?.clone())];
        for asset in &asset_columns {
            columns.push(Column::from(Series::new(asset.as_str().into(), series_by_asset[asset].clone())));
        }
        Frame::from_df(DataFrame::new(columns).unwrap())
    }
}

/// `number(value=V)`: a `Scalar`-category transform producing the same
/// constant for every asset, cached once.
struct NumberScalar(TransformConfiguration);
impl TransformBase for NumberScalar {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        Vec::new()
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        let value = self.0.option("value").and_then(|v| v.as_decimal()).unwrap_or(0.0);
        let height = frame.height().max(1);
        let df = DataFrame::new(vec![
            Column::from(frame.index()?.clone()),
            Column::from(Series::new("result".into(), vec![value; height])),
        ])
        .unwrap();
        Frame::from_df(df)
    }
}

struct AssetRefPassthrough(TransformConfiguration);
impl TransformBase for AssetRefPassthrough {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        vec!["c".to_string()]
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        Ok(frame)
    }
}

/// `add_const(arg, k)`: sums a node-wired input with a literal `Constant`
/// wired to the other slot — exercises the `scalar_cache` seeding a
/// `InputValue::Literal` needs before `GatherInputs` can resolve it.
struct AddConstant(TransformConfiguration);
impl TransformBase for AddConstant {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        Vec::new()
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        let arg_col = self.0.get_input("arg").unwrap().column_id().unwrap();
        let k_col = self.0.get_input("k").unwrap().column_id().unwrap();
        let a = col_f64(&frame, &arg_col);
        let b = col_f64(&frame, &k_col);
        let out: Vec<Option<f64>> = a
            .into_iter()
            .zip(b)
            .map(|(x, y)| match (x, y) {
                (Some(x), Some(y)) => Some(x + y),
                _ => None,
            })
            .collect();
        let df = DataFrame::new(vec![
            Column::from(frame.index()?.clone()),
            Column::from(Series::new("result".into(), out)),
        ])
        .unwrap();
        Frame::from_df(df)
    }
}

struct SleepyTransform(TransformConfiguration);
impl TransformBase for SleepyTransform {
    fn id(&self) -> &str {
        &self.0.id
    }
    fn configuration(&self) -> &TransformConfiguration {
        &self.0
    }
    fn required_data_sources(&self) -> Vec<String> {
        vec!["c".to_string()]
    }
    fn transform_data(&self, frame: Frame) -> dataflow_engine::EngineResult<Frame> {
        std::thread::sleep(std::time::Duration::from_millis(200));
        frame.rename("c", "result")
    }
}

fn raw_input(slot: &str) -> InputMapping {
    let mut m = InputMapping::new();
    m.insert(slot.to_string(), vec![InputValue::Node(NodeRef::new("RAW", "result"))]);
    m
}

#[tokio::test]
async fn s1_linear_chain_per_asset() {
    let mut manager = TransformManager::new(|c| {
        let id = c.id.clone();
        match id.as_str() {
            "A" => Arc::new(IdentityFromBase(c)) as Arc<dyn TransformBase>,
            "B" => Arc::new(Sma(c)) as Arc<dyn TransformBase>,
            _ => Arc::new(Diff(c)) as Arc<dyn TransformBase>,
        }
    });

    manager
        .insert(cfg("A", meta("identity", TransformCategory::Math, vec![]), HashMap::new(), InputMapping::new()))
        .unwrap();

    let mut b_options = HashMap::new();
    b_options.insert("period".to_string(), OptionValue::from(Value::Integer(3)));
    manager
        .insert(cfg(
            "B",
            meta("sma", TransformCategory::Trend, vec![IoMetaData::new(IoDataType::Decimal, "arg", "Arg")]),
            b_options,
            raw_input_named("arg", "A"),
        ))
        .unwrap();

    manager
        .insert(cfg(
            "C",
            meta("diff", TransformCategory::Math, vec![IoMetaData::new(IoDataType::Decimal, "arg", "Arg")]),
            HashMap::new(),
            raw_input_named("arg", "B"),
        ))
        .unwrap();

    let orchestrator = Orchestrator::new(manager).unwrap();
    let mut by_asset = HashMap::new();
    by_asset.insert("AAPL".to_string(), base_frame("c", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    let mut base = HashMap::new();
    base.insert("1D".to_string(), by_asset);

    let result = orchestrator.execute_pipeline(base).await.unwrap();
    let aapl = &result["1D"]["AAPL"];

    assert_eq!(col_f64(aapl, "A#result"), vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0), Some(6.0)]);
    assert_eq!(
        col_f64(aapl, "B#result"),
        vec![None, None, Some(2.0), Some(3.0), Some(4.0), Some(5.0)]
    );
    assert_eq!(
        col_f64(aapl, "C#result"),
        vec![None, None, None, Some(1.0), Some(1.0), Some(1.0)]
    );
}

fn raw_input_named(slot: &str, producer: &str) -> InputMapping {
    let mut m = InputMapping::new();
    m.insert(slot.to_string(), vec![InputValue::Node(NodeRef::new(producer, "result"))]);
    m
}

#[tokio::test]
async fn s2_diamond_merge() {
    let mut manager = TransformManager::new(|c| {
        let id = c.id.clone();
        match id.as_str() {
            "RAW" => Arc::new(IdentityFromBase(c)) as Arc<dyn TransformBase>,
            "A" | "B" => Arc::new(Sma(c)) as Arc<dyn TransformBase>,
            _ => Arc::new(Subtract(c)) as Arc<dyn TransformBase>,
        }
    });

    manager
        .insert(cfg("RAW", meta("identity", TransformCategory::Math, vec![]), HashMap::new(), InputMapping::new()))
        .unwrap();

    let sma_meta = || meta("sma", TransformCategory::Trend, vec![IoMetaData::new(IoDataType::Decimal, "arg", "Arg")]);

    let mut a_options = HashMap::new();
    a_options.insert("period".to_string(), OptionValue::from(Value::Integer(3)));
    manager.insert(cfg("A", sma_meta(), a_options, raw_input("arg"))).unwrap();

    let mut b_options = HashMap::new();
    b_options.insert("period".to_string(), OptionValue::from(Value::Integer(5)));
    manager.insert(cfg("B", sma_meta(), b_options, raw_input("arg"))).unwrap();

    let mut c_inputs = InputMapping::new();
    c_inputs.insert("left".to_string(), vec![InputValue::Node(NodeRef::new("A", "result"))]);
    c_inputs.insert("right".to_string(), vec![InputValue::Node(NodeRef::new("B", "result"))]);
    manager
        .insert(cfg(
            "C",
            meta(
                "subtract",
                TransformCategory::Math,
                vec![
                    IoMetaData::new(IoDataType::Decimal, "left", "Left"),
                    IoMetaData::new(IoDataType::Decimal, "right", "Right"),
                ],
            ),
            HashMap::new(),
            c_inputs,
        ))
        .unwrap();

    let orchestrator = Orchestrator::new(manager).unwrap();
    let mut by_asset = HashMap::new();
    by_asset.insert("AAPL".to_string(), base_frame("c", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]));
    let mut base = HashMap::new();
    base.insert("1D".to_string(), by_asset);

    let result = orchestrator.execute_pipeline(base).await.unwrap();
    let c = col_f64(&result["1D"]["AAPL"], "C#result");
    assert!(c[0].is_none() && c[3].is_none());
    assert!(c[4].is_some());
}

#[tokio::test]
async fn s3_cross_sectional_top_k() {
    let mut manager = TransformManager::new(|c| {
        let id = c.id.clone();
        if id == "RAW" {
            Arc::new(IdentityFromBase(c)) as Arc<dyn TransformBase>
        } else {
            Arc::new(TopK(c)) as Arc<dyn TransformBase>
        }
    });
    manager
        .insert(cfg("RAW", meta("identity", TransformCategory::Math, vec![]), HashMap::new(), InputMapping::new()))
        .unwrap();

    let mut metadata = meta("top_k", TransformCategory::Factor, vec![IoMetaData::new(IoDataType::Decimal, "arg", "Arg")]);
    Arc::get_mut(&mut metadata).unwrap().is_cross_sectional = true;
    let mut options = HashMap::new();
    options.insert("k".to_string(), OptionValue::from(Value::Integer(2)));
    manager.insert(cfg("top_k", metadata, options, raw_input("arg"))).unwrap();

    let orchestrator = Orchestrator::new(manager).unwrap();
    let mut by_asset = HashMap::new();
    by_asset.insert("MSFT".to_string(), base_frame("c", &[100.0, 101.0, 102.0]));
    by_asset.insert("AAPL".to_string(), base_frame("c", &[200.0, 201.0, 202.0]));
    by_asset.insert("TICKER3".to_string(), base_frame("c", &[50.0, 51.0, 52.0]));
    let mut base = HashMap::new();
    base.insert("1D".to_string(), by_asset);

    let result = orchestrator.execute_pipeline(base).await.unwrap();
    assert_eq!(col_f64(&result["1D"]["MSFT"], "top_k#result"), vec![Some(1.0), Some(1.0), Some(1.0)]);
    assert_eq!(col_f64(&result["1D"]["AAPL"], "top_k#result"), vec![Some(1.0), Some(1.0), Some(1.0)]);
    assert_eq!(col_f64(&result["1D"]["TICKER3"], "top_k#result"), vec![Some(0.0), Some(0.0), Some(0.0)]);
}

#[tokio::test]
async fn s4_scalar_broadcast() {
    let mut manager = TransformManager::new(|c| Arc::new(NumberScalar(c)) as Arc<dyn TransformBase>);
    let mut options = HashMap::new();
    options.insert("value".to_string(), OptionValue::from(Value::Decimal(42.0)));
    manager
        .insert(cfg("number", meta("number", TransformCategory::Scalar, vec![]), options, InputMapping::new()))
        .unwrap();

    let orchestrator = Orchestrator::new(manager).unwrap();
    let base = two_asset_base("AAPL", &[1.0, 2.0, 3.0], "MSFT", &[4.0, 5.0, 6.0]);
    let result = orchestrator.execute_pipeline(base).await.unwrap();

    for asset in ["AAPL", "MSFT"] {
        let values = col_f64(&result["1D"][asset], "number#result");
        assert!(values.iter().all(|v| *v == Some(42.0)));
    }
}

#[tokio::test]
async fn s5_asset_ref_passthrough() {
    let mut manager = TransformManager::new(|c| Arc::new(AssetRefPassthrough(c)) as Arc<dyn TransformBase>);
    let mut options = HashMap::new();
    options.insert("ticker".to_string(), OptionValue::from(Value::String("SPY".to_string())));
    let mut meta_asset_ref = meta("asset_ref", TransformCategory::DataSource, vec![]);
    Arc::get_mut(&mut meta_asset_ref).unwrap().outputs = vec![IoMetaData::new(IoDataType::Decimal, "c", "Close")];
    manager
        .insert(cfg("asset_ref", meta_asset_ref, options, InputMapping::new()))
        .unwrap();

    let orchestrator = Orchestrator::new(manager).unwrap();
    let base = two_asset_base("SPY", &[1.0, 2.0, 3.0], "QQQ", &[4.0, 5.0, 6.0]);
    let result = orchestrator.execute_pipeline(base).await.unwrap();

    assert!(result["1D"]["SPY"].contains("asset_ref#c"));
    assert!(!result["1D"]["QQQ"].contains("asset_ref#c"));
}

#[tokio::test]
async fn s6_cancellation_mid_execution_halts_unstarted_nodes() {
    let mut manager = TransformManager::new(|c| Arc::new(SleepyTransform(c)) as Arc<dyn TransformBase>);
    for i in 0..10 {
        manager
            .insert(cfg(
                &format!("t{i}"),
                meta("sleepy", TransformCategory::Math, vec![]),
                HashMap::new(),
                InputMapping::new(),
            ))
            .unwrap();
    }

    let storage = Arc::new(IntermediateStorage::new());
    let dispatcher = EventDispatcher::new();
    let cancellation = CancellationToken::new();

    let completed = Arc::new(AtomicUsize::new(0));
    let completed_clone = completed.clone();
    let cancelled_seen = Arc::new(AtomicBool::new(false));
    let cancelled_clone = cancelled_seen.clone();
    dispatcher.on_event(EventFilter::all(), move |event| match event {
        Event::NodeCompleted { .. } => {
            completed_clone.fetch_add(1, Ordering::SeqCst);
        }
        Event::PipelineCancelled { .. } => {
            cancelled_clone.store(true, Ordering::SeqCst);
        }
        _ => {}
    });

    let orchestrator =
        Orchestrator::with_collaborators(manager, storage, dispatcher, cancellation.clone()).unwrap();

    let cancel_handle = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancellation.cancel();
        })
    };

    let base = two_asset_base("AAPL", &[1.0, 2.0, 3.0], "MSFT", &[4.0, 5.0, 6.0]);
    let result = orchestrator.execute_pipeline(base).await;
    cancel_handle.await.unwrap();

    assert!(result.is_err());
    assert!(cancelled_seen.load(Ordering::SeqCst));
    assert!(completed.load(Ordering::SeqCst) < 10);
}

#[tokio::test]
async fn s7_literal_constant_input() {
    let mut manager = TransformManager::new(|c| {
        let id = c.id.clone();
        if id == "RAW" {
            Arc::new(IdentityFromBase(c)) as Arc<dyn TransformBase>
        } else {
            Arc::new(AddConstant(c)) as Arc<dyn TransformBase>
        }
    });
    manager
        .insert(cfg("RAW", meta("identity", TransformCategory::Math, vec![]), HashMap::new(), InputMapping::new()))
        .unwrap();

    let mut inputs = InputMapping::new();
    inputs.insert("arg".to_string(), vec![InputValue::Node(NodeRef::new("RAW", "result"))]);
    inputs.insert(
        "k".to_string(),
        vec![InputValue::Literal(Constant::new(Value::Decimal(10.0)))],
    );
    manager
        .insert(cfg(
            "add_const",
            meta(
                "add_const",
                TransformCategory::Math,
                vec![
                    IoMetaData::new(IoDataType::Decimal, "arg", "Arg"),
                    IoMetaData::new(IoDataType::Decimal, "k", "K"),
                ],
            ),
            HashMap::new(),
            inputs,
        ))
        .unwrap();

    let orchestrator = Orchestrator::new(manager).unwrap();
    let mut by_asset = HashMap::new();
    by_asset.insert("AAPL".to_string(), base_frame("c", &[1.0, 2.0, 3.0]));
    let mut base = HashMap::new();
    base.insert("1D".to_string(), by_asset);

    let result = orchestrator.execute_pipeline(base).await.unwrap();
    assert_eq!(
        col_f64(&result["1D"]["AAPL"], "add_const#result"),
        vec![Some(11.0), Some(12.0), Some(13.0)]
    );
}
