//! End-to-end pipeline tests: raw transcript lines through alignment,
//! tokenization, and convention rewrites to a finished graph.

use anchorage::prelude::*;

/// CHAT-flavoured schema: turn > utterance (saturated), words parented to
/// the turn, plus annotation layers the conventions write to.
struct Layers {
    turn: LayerId,
    utterance: LayerId,
    word: LayerId,
    retrace: LayerId,
    pronounce: LayerId,
}

fn chat_schema() -> (Schema, Layers) {
    let mut schema = Schema::new();
    let turn = schema.add_layer(Layer::interval("turn"));
    let utterance = schema.add_layer(
        Layer::interval("utterance")
            .with_parent(turn)
            .saturated(true),
    );
    let word = schema.add_layer(Layer::interval("word").with_parent(turn));
    let retrace = schema.add_layer(Layer::interval("retrace").with_parent(turn));
    let pronounce = schema.add_layer(Layer::tag("pronounce").with_parent(word));
    let layers = Layers {
        turn,
        utterance,
        word,
        retrace,
        pronounce,
    };
    (schema, layers)
}

/// One speaker turn with utterance lines chained through unknown anchors,
/// the shape a deserializer hands to the pipeline.
fn chained_turn(graph: &mut Graph, layers: &Layers, speaker: &str, lines: &[&str]) -> AnnotationId {
    let anchors: Vec<AnchorId> = (0..=lines.len())
        .map(|_| graph.mint_anchor(Confidence::None))
        .collect();
    let turn = graph.add_annotation(
        layers.turn,
        speaker,
        anchors[0],
        anchors[lines.len()],
        None,
    );
    for (i, line) in lines.iter().enumerate() {
        graph.add_annotation(layers.utterance, *line, anchors[i], anchors[i + 1], Some(turn));
    }
    turn
}

fn word_labels(graph: &Graph, turn: AnnotationId, word: LayerId) -> Vec<String> {
    graph
        .children(turn, word)
        .into_iter()
        .map(|w| graph.annotation(w).label.clone())
        .collect()
}

fn chat_pipeline(layers: &Layers) -> Pipeline {
    Pipeline::new()
        .stage(
            AlignmentResolver::chat_style(layers.turn, layers.utterance)
                .unwrap()
                .with_duration_hint(60.0),
        )
        .stage(Tokenizer::new(layers.utterance, layers.word).unwrap())
        .stage(
            SpanningConvention::new(layers.word, r"<(.*)>", r"\[//\]")
                .unwrap()
                .with_destination(layers.retrace)
                .with_open_label("$1")
                .collapse(true)
                .close_gaps(true),
        )
        .stage(
            Convention::new(layers.word, r"(.+)y/s", "${1}ies")
                .unwrap()
                .with_destination(layers.pronounce, "$0"),
        )
}

#[test]
fn full_chat_pipeline() {
    let (schema, layers) = chat_schema();
    let mut graph = Graph::new("session", schema);
    let turn = chained_turn(
        &mut graph,
        &layers,
        "MOT",
        &[
            "the <picnic> [//] picnic was fun 0_4000",
            "the baby/s liked it 4000_9000",
        ],
    );

    let warnings = chat_pipeline(&layers).run(&mut graph).unwrap();
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");

    // alignment: both utterances timed, chained at the 4s anchor
    let utterances = graph.children(turn, layers.utterance);
    let u0 = graph.annotation(utterances[0]);
    let u1 = graph.annotation(utterances[1]);
    assert_eq!(graph.offset(u0.start), Some(0.0));
    assert_eq!(graph.offset(u0.end), Some(4.0));
    assert_eq!(u0.end, u1.start);
    assert_eq!(graph.offset(u1.end), Some(9.0));

    // conventions: retrace collapsed, morphology rewritten
    assert_eq!(
        word_labels(&graph, turn, layers.word),
        vec!["the", "picnic", "was", "fun", "the", "babies", "liked", "it"]
    );
    let retraces = graph.children(turn, layers.retrace);
    assert_eq!(retraces.len(), 1);
    assert_eq!(graph.annotation(retraces[0]).label, "picnic");

    // the pronounce tag shares the rewritten word's anchors
    let babies = graph
        .annotations_in(layers.word)
        .into_iter()
        .find(|w| graph.annotation(*w).label == "babies")
        .unwrap();
    let tags = graph.tags_of(babies, layers.pronounce);
    assert_eq!(tags.len(), 1);
    assert_eq!(graph.annotation(tags[0]).label, "baby/s");
    assert_eq!(graph.annotation(tags[0]).start, graph.annotation(babies).start);
}

#[test]
fn alignment_repairs_flow_through_tokenization() {
    let (schema, layers) = chat_schema();
    let mut graph = Graph::new("session", schema);
    let turn = chained_turn(
        &mut graph,
        &layers,
        "MOT",
        &["first one 0_2000", "second one 5000_7000"],
    );

    let warnings = chat_pipeline(&layers).run(&mut graph).unwrap();
    assert!(warnings
        .iter()
        .any(|w| matches!(w, Warning::GapFilled { from, to } if *from == 2.0 && *to == 5.0)));

    // the filler utterance exists but contributes no words
    let utterances = graph.children(turn, layers.utterance);
    assert_eq!(utterances.len(), 3);
    assert_eq!(
        word_labels(&graph, turn, layers.word),
        vec!["first", "one", "second", "one"]
    );
}

#[test]
fn blank_utterance_contributes_no_words() {
    let (schema, layers) = chat_schema();
    let mut graph = Graph::new("session", schema);
    let turn = chained_turn(&mut graph, &layers, "MOT", &["   ", "real words 0_2000"]);

    chat_pipeline(&layers).run(&mut graph).unwrap();

    assert_eq!(word_labels(&graph, turn, layers.word), vec!["real", "words"]);
    // the blank utterance is still part of the graph
    assert_eq!(graph.children(turn, layers.utterance).len(), 2);
}

#[test]
fn batch_continues_past_fatal_transcript() {
    // a fatal alignment error fails its own transcript only; the rest of
    // the batch still runs
    let (schema, layers) = chat_schema();
    let mut good = Graph::new("good", schema.clone());
    chained_turn(&mut good, &layers, "MOT", &["all fine 0_2000"]);
    let mut bad = Graph::new("bad", schema);
    chained_turn(&mut bad, &layers, "MOT", &["backwards 5000_2000"]);

    let pipeline = Pipeline::new()
        .stage(AlignmentResolver::chat_style(layers.turn, layers.utterance).unwrap())
        .stage(Tokenizer::new(layers.utterance, layers.word).unwrap());
    let batch = Batch::new();
    let mut graphs = vec![good, bad];
    let results = batch.run(&pipeline, &mut graphs);

    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(Error::Alignment { .. })));
    assert_eq!(batch.progress(), (2, 2));
}

#[test]
fn alignment_errors_accumulate_before_failing() {
    let (schema, layers) = chat_schema();
    let mut graph = Graph::new("session", schema);
    chained_turn(
        &mut graph,
        &layers,
        "MOT",
        &["backwards 3000_1000", "fine 3000_4000", "also backwards 9000_5000"],
    );

    let err = chat_pipeline(&layers).run(&mut graph).unwrap_err();
    let Error::Alignment { errors } = err else {
        panic!("expected alignment failure, got {err}");
    };
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].label, "backwards");
    assert_eq!(errors[1].label, "also backwards");
}

#[test]
fn overlapping_turns_resolve_independently() {
    let (schema, layers) = chat_schema();
    let mut graph = Graph::new("session", schema);
    let mot = chained_turn(&mut graph, &layers, "MOT", &["hello there 0_2000"]);
    let chi = chained_turn(&mut graph, &layers, "CHI", &["hi 1000_1500"]);

    let warnings = Pipeline::new()
        .stage(AlignmentResolver::chat_style(layers.turn, layers.utterance).unwrap())
        .run(&mut graph)
        .unwrap();
    // overlap checks apply within a turn, not across speakers
    assert!(warnings.is_empty());

    let m = graph.children(mot, layers.utterance)[0];
    let c = graph.children(chi, layers.utterance)[0];
    assert_eq!(graph.offset(graph.annotation(m).start), Some(0.0));
    assert_eq!(graph.offset(graph.annotation(c).start), Some(1.0));
    // different offsets, different anchors, same timeline
    assert_ne!(graph.annotation(m).start, graph.annotation(c).start);
}

#[test]
fn marker_scratch_is_transient() {
    let (schema, layers) = chat_schema();
    let mut graph = Graph::new("session", schema);
    let turn = chained_turn(&mut graph, &layers, "MOT", &["one two 0_2000"]);
    chat_pipeline(&layers).run(&mut graph).unwrap();

    let word = graph.children(turn, layers.word)[0];
    graph.annotation_mut(word).marker = Some("seen".into());

    let json = serde_json::to_string(&graph).unwrap();
    assert!(!json.contains("seen"));
    let back: Graph = serde_json::from_str(&json).unwrap();
    let word_back = back.children(turn, layers.word)[0];
    assert_eq!(back.annotation(word_back).label, "one");
    assert_eq!(back.annotation(word_back).marker, None);
}
