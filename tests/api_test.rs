mod common;

use std::sync::Arc;

use actix_web::{App, http::StatusCode, http::header, test as actix_test};
use common::{
    CountingClassifier, FixedClassifier, SweepingClassifier, app_state, corrupted_jpeg_bytes,
    dir_is_empty, jpeg_bytes, multipart_body, multipart_content_type, png_bytes, test_config,
};
use serde_json::{Value, json};
use sgl_classifier_rs::oracle::OracleState;
use sgl_classifier_rs::server::configure;

fn upload_request(uri: &str, filename: &str, data: &[u8]) -> actix_test::TestRequest {
    actix_test::TestRequest::post()
        .uri(uri)
        .insert_header((header::CONTENT_TYPE, multipart_content_type()))
        .set_payload(multipart_body("file", filename, data))
}

mod predict_upload_tests {
    use super::*;

    #[actix_web::test]
    async fn test_predict_sorted_probabilities() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(
            &config,
            OracleState::ready(FixedClassifier(vec![0.1, 0.7, 0.1, 0.1])),
        );
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/predict", "lesion.jpg", &jpeg_bytes()).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["prediction"]["predicted_class"], "Measles");
        assert_eq!(body["prediction"]["confidence"], 70.0);

        let probs = body["prediction"]["class_probabilities"]
            .as_object()
            .unwrap();
        let order: Vec<&str> = probs.keys().map(String::as_str).collect();
        assert_eq!(order, ["Measles", "Chickenpox", "Monkeypox", "Normal"]);
        assert_eq!(probs["Chickenpox"], 10.0);
        assert_eq!(probs["Monkeypox"], 10.0);
        assert_eq!(probs["Normal"], 10.0);

        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_api_predict_alias_accepts_png() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(
            &config,
            OracleState::ready(FixedClassifier(vec![0.05, 0.05, 0.8, 0.1])),
        );
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/api/predict", "skin.PNG", &png_bytes()).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["prediction"]["predicted_class"], "Monkeypox");
        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_invalid_extension_rejected() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let classifier = Arc::new(CountingClassifier::new([1, 224, 224, 3], vec![0.25; 4]));
        let state = app_state(&config, OracleState::Ready(classifier.clone()));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/predict", "x.txt", b"0123456789").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Invalid file format.")
        );
        assert_eq!(classifier.calls(), 0);
        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_empty_filename_rejected() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/predict", "", &png_bytes()).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file selected. Please choose an image.");
    }

    #[actix_web::test]
    async fn test_missing_file_field_rejected() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::post()
            .uri("/predict")
            .insert_header((header::CONTENT_TYPE, multipart_content_type()))
            .set_payload(multipart_body("image", "a.png", &png_bytes()))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(
            body["error"],
            "No file provided. Please select an image to upload."
        );
    }

    #[actix_web::test]
    async fn test_corrupted_jpeg_is_bad_request() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/predict", "broken.jpg", &corrupted_jpeg_bytes()).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Failed to load image.")
        );
        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_413() {
        let uploads = tempfile::tempdir().unwrap();
        let mut config = test_config(uploads.path());
        config.max_upload_bytes = 1024;
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/predict", "big.png", &[7u8; 4096]).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("File too large.")
        );
        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_concurrent_uploads_share_one_model() {
        let uploads = tempfile::tempdir().unwrap();
        let mut config = test_config(uploads.path());
        config.preprocess.target_height = 32;
        config.preprocess.target_width = 32;
        let classifier = Arc::new(CountingClassifier::new(
            [1, 32, 32, 3],
            vec![0.6, 0.2, 0.1, 0.1],
        ));
        let state = app_state(&config, OracleState::Ready(classifier.clone()));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let jpeg = jpeg_bytes();
        let requests = (0..8).map(|i| {
            let req = upload_request("/predict", &format!("img{}.jpg", i), &jpeg).to_request();
            actix_test::call_service(&app, req)
        });
        let responses = futures_util::future::join_all(requests).await;

        for resp in responses {
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(classifier.calls(), 8);
        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_cleanup_failure_keeps_prediction() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(
            &config,
            OracleState::ready(SweepingClassifier {
                upload_dir: uploads.path().to_path_buf(),
                probs: vec![0.2, 0.1, 0.6, 0.1],
            }),
        );
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/predict", "lesion.png", &png_bytes()).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["prediction"]["predicted_class"], "Monkeypox");
        assert_eq!(body["prediction"]["confidence"], 60.0);
    }
}

mod oracle_unavailable_tests {
    use super::*;

    #[actix_web::test]
    async fn test_predict_returns_503() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::unavailable("model file missing"));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = upload_request("/predict", "lesion.jpg", &jpeg_bytes()).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "Model is not loaded. Please ensure the model file exists."
        );
        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_metadata_still_served() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::unavailable("model file missing"));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::get().uri("/api/info").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["model_loaded"], false);

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model_loaded"], false);
    }
}

mod predict_path_tests {
    use super::*;

    #[actix_web::test]
    async fn test_existing_path_is_classified_and_kept() {
        let images = tempfile::tempdir().unwrap();
        let image_path = images.path().join("sample.png");
        std::fs::write(&image_path, png_bytes()).unwrap();

        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(
            &config,
            OracleState::ready(FixedClassifier(vec![0.1, 0.1, 0.1, 0.7])),
        );
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({ "image_path": image_path }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["prediction"]["predicted_class"], "Normal");
        assert!(image_path.exists());
        assert!(dir_is_empty(uploads.path()));
    }

    #[actix_web::test]
    async fn test_missing_path_is_bad_request() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({ "image_path": "/no/such/image.jpg" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid image path. File does not exist.");
    }

    #[actix_web::test]
    async fn test_path_outside_allowed_root_rejected() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let image_path = elsewhere.path().join("sample.png");
        std::fs::write(&image_path, png_bytes()).unwrap();

        let uploads = tempfile::tempdir().unwrap();
        let mut config = test_config(uploads.path());
        config.allowed_image_root = Some(root.path().to_path_buf());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({ "image_path": image_path }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(image_path.exists());
    }

    #[actix_web::test]
    async fn test_body_without_image_is_bad_request() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        for req in [
            actix_test::TestRequest::post()
                .uri("/predict")
                .set_json(json!({ "other": 1 }))
                .to_request(),
            actix_test::TestRequest::post().uri("/predict").to_request(),
        ] {
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = actix_test::read_body_json(resp).await;
            assert_eq!(
                body["error"],
                "No file provided. Please select an image to upload."
            );
        }
    }
}

mod metadata_tests {
    use super::*;

    #[actix_web::test]
    async fn test_classes_in_label_order() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::get()
            .uri("/api/classes")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({ "classes": ["Chickenpox", "Measles", "Monkeypox", "Normal"] })
        );
    }

    #[actix_web::test]
    async fn test_model_info() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::get().uri("/api/info").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["title"], "Skin Disease Prediction System");
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["input_size"], json!({ "height": 224, "width": 224 }));
        assert_eq!(body["preprocessing"]["normalization"], "unit-scale");
        assert_eq!(body["preprocessing"]["channel_order"], "rgb");
        assert_eq!(body["preprocessing"]["resample"], "bilinear");
        assert_eq!(body["classes"].as_array().unwrap().len(), 4);
    }

    #[actix_web::test]
    async fn test_root_health_check() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::get().uri("/").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model_loaded"], true);
    }

    #[actix_web::test]
    async fn test_unknown_route_is_json_404() {
        let uploads = tempfile::tempdir().unwrap();
        let config = test_config(uploads.path());
        let state = app_state(&config, OracleState::ready(FixedClassifier(vec![0.25; 4])));
        let app =
            actix_test::init_service(App::new().app_data(state.clone()).configure(configure))
                .await;

        let req = actix_test::TestRequest::get()
            .uri("/does/not/exist")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({ "success": false, "error": "The requested resource was not found." })
        );
    }
}
