use std::task::{Context, Poll};
use std::time::Instant;

use http::{Request, Response};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tower::{Layer, Service};
use tracing::debug;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    method: String,
    status: String,
}

/// Tower layer that records request count/duration for the Kubernetes API
/// client's HTTP stack.
#[derive(Clone)]
pub struct MetricsLayer {
    request_count: Family<RequestLabels, Counter>,
    request_duration: Family<RequestLabels, Histogram>,
}

impl MetricsLayer {
    pub fn new(registry: &mut Registry) -> Self {
        debug!("initializing Kubernetes client metrics");
        let request_count = Family::<RequestLabels, Counter>::default();
        let request_duration =
            Family::<RequestLabels, Histogram>::new_with_constructor(|| {
                Histogram::new([0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0].into_iter())
            });

        registry.register(
            "kubernetes_client_http_requests",
            "Total number of HTTP requests made by the Kubernetes client",
            request_count.clone(),
        );
        registry.register(
            "kubernetes_client_http_request_duration_seconds",
            "HTTP request duration in seconds",
            request_duration.clone(),
        );

        Self {
            request_count,
            request_duration,
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        MetricsService {
            inner: service,
            request_count: self.request_count.clone(),
            request_duration: self.request_duration.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    request_count: Family<RequestLabels, Counter>,
    request_duration: Family<RequestLabels, Histogram>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().to_string();
        let start = Instant::now();
        let future = self.inner.call(req);

        MetricsFuture {
            future,
            method,
            start,
            request_count: self.request_count.clone(),
            request_duration: self.request_duration.clone(),
        }
    }
}

#[pin_project::pin_project]
pub struct MetricsFuture<F> {
    #[pin]
    future: F,
    method: String,
    start: Instant,
    request_count: Family<RequestLabels, Counter>,
    request_duration: Family<RequestLabels, Histogram>,
}

impl<F, ResBody, E> std::future::Future for MetricsFuture<F>
where
    F: std::future::Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let poll_result = this.future.poll(cx);

        if let Poll::Ready(Ok(response)) = &poll_result {
            let duration = this.start.elapsed().as_secs_f64();
            let labels = RequestLabels {
                method: this.method.clone(),
                status: response.status().as_str().to_string(),
            };
            this.request_count.get_or_create(&labels).inc();
            this.request_duration
                .get_or_create(&labels)
                .observe(duration);
        }

        poll_result
    }
}
